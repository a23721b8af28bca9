#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use railscrape::{
    detail_scraper::DetailScraperSettings,
    list_scraper::ListScraperSettings,
    orchestrator::{OrchestratorSettings, PORTAL_URL, SessionPolicy},
    page_driver::{DriverError, PageDriver, SessionLauncher},
    progress::Progress,
    records::DelayInfo,
    requests::{FetchError, ListingSource},
};
use scraper::{ElementRef, Html, Selector};

/// Static HTML documents keyed by URL. Clicking an element with an `href` or
/// `formaction` loads the document of that name; `{number}` in a `formaction` is
/// replaced by the last value typed into an input.
#[derive(Clone, Default)]
pub struct Site {
    pages: HashMap<String, String>,
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

struct PageState {
    html: String,
    document: Html,
    typed: Option<String>,
}

pub struct FixturePage {
    site: Site,
    state: RefCell<PageState>,
    pub visited: RefCell<Vec<String>>,
    /// Text of every clicked element, shared with the launcher that opened the page.
    pub clicks: Rc<RefCell<Vec<String>>>,
    /// Closed sessions, shared with the launcher that opened the page.
    pub closes: Rc<Cell<usize>>,
}

fn parse_selector(selector: &str) -> Result<Selector, DriverError> {
    Selector::parse(selector).map_err(|err| DriverError::Command(format!("{selector}: {err:?}")))
}

fn render_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl FixturePage {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            state: RefCell::new(PageState {
                html: String::new(),
                document: Html::parse_document(""),
                typed: None,
            }),
            visited: RefCell::new(Vec::new()),
            clicks: Rc::default(),
            closes: Rc::default(),
        }
    }

    fn load(&self, url: &str) -> bool {
        let Some(html) = self.site.pages.get(url) else {
            return false;
        };
        let mut state = self.state.borrow_mut();
        state.html = html.clone();
        state.document = Html::parse_document(html);
        self.visited.borrow_mut().push(url.to_string());
        true
    }

    fn with_element<T>(&self, index: usize, f: impl FnOnce(ElementRef) -> T) -> Result<T, DriverError> {
        let state = self.state.borrow();
        let all = Selector::parse("*").unwrap();
        let element = state
            .document
            .select(&all)
            .nth(index)
            .ok_or_else(|| DriverError::Command("stale element".to_string()))?;
        Ok(f(element))
    }

    fn indices<'a>(document: &'a Html, matched: impl Iterator<Item = ElementRef<'a>>) -> Vec<usize> {
        let all = Selector::parse("*").unwrap();
        let order: Vec<_> = document.select(&all).map(|el| el.id()).collect();
        matched
            .filter_map(|el| order.iter().position(|id| *id == el.id()))
            .collect()
    }
}

impl PageDriver for FixturePage {
    type Element = usize;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        if self.load(url) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                timeout,
                what: format!("navigation to {url}"),
            })
        }
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<usize>, DriverError> {
        let selector = parse_selector(selector)?;
        let state = self.state.borrow();
        Ok(Self::indices(&state.document, state.document.select(&selector)))
    }

    async fn find_all_in(&self, parent: &usize, selector: &str) -> Result<Vec<usize>, DriverError> {
        let selector = parse_selector(selector)?;
        let state = self.state.borrow();
        let all = Selector::parse("*").unwrap();
        let parent = state
            .document
            .select(&all)
            .nth(*parent)
            .ok_or_else(|| DriverError::Command("stale element".to_string()))?;
        Ok(Self::indices(&state.document, parent.select(&selector)))
    }

    async fn text(&self, element: &usize) -> Result<String, DriverError> {
        self.with_element(*element, render_text)
    }

    async fn attr(&self, element: &usize, name: &str) -> Result<Option<String>, DriverError> {
        self.with_element(*element, |el| el.value().attr(name).map(String::from))
    }

    async fn click(&self, element: &usize) -> Result<(), DriverError> {
        let (label, target) = self.with_element(*element, |el| {
            let target = el
                .value()
                .attr("href")
                .or_else(|| el.value().attr("formaction"))
                .map(String::from);
            (render_text(el), target)
        })?;
        self.clicks.borrow_mut().push(label);
        if let Some(target) = target {
            let typed = self.state.borrow().typed.clone().unwrap_or_default();
            // Unknown targets leave the page as it was, like a dead link.
            self.load(&target.replace("{number}", &typed));
        }
        Ok(())
    }

    async fn fill(&self, _element: &usize, value: &str) -> Result<(), DriverError> {
        self.state.borrow_mut().typed = Some(value.to_string());
        Ok(())
    }

    async fn source(&self) -> Result<String, DriverError> {
        Ok(self.state.borrow().html.clone())
    }

    async fn close(self) -> Result<(), DriverError> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

pub struct FixtureLauncher {
    pub site: Site,
    pub fail: bool,
    pub launches: Cell<usize>,
    pub user_agents: RefCell<Vec<String>>,
    pub clicks: Rc<RefCell<Vec<String>>>,
    pub closes: Rc<Cell<usize>>,
}

impl FixtureLauncher {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            fail: false,
            launches: Cell::new(0),
            user_agents: RefCell::new(Vec::new()),
            clicks: Rc::default(),
            closes: Rc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Site::new())
        }
    }
}

impl SessionLauncher for FixtureLauncher {
    type Page = FixturePage;

    async fn launch(&self, user_agent: &str) -> Result<FixturePage, DriverError> {
        if self.fail {
            return Err(DriverError::Session("connection refused".to_string()));
        }
        self.launches.set(self.launches.get() + 1);
        self.user_agents.borrow_mut().push(user_agent.to_string());
        let mut page = FixturePage::new(self.site.clone());
        page.clicks = Rc::clone(&self.clicks);
        page.closes = Rc::clone(&self.closes);
        Ok(page)
    }
}

/// Hands out queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedSource {
    responses: RefCell<VecDeque<Result<String, FetchError>>>,
    pub requests: RefCell<Vec<(String, String)>>,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<String, FetchError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn pages(pages: &[&str]) -> Self {
        Self::new(pages.iter().map(|html| Ok(html.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl ListingSource for ScriptedSource {
    async fn fetch_page(&self, url: &str, user_agent: &str) -> Result<String, FetchError> {
        self.requests
            .borrow_mut()
            .push((url.to_string(), user_agent.to_string()));
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Network("script exhausted".to_string())))
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub total: Option<usize>,
    pub pages: Vec<(u32, usize)>,
    pub trains: Vec<(String, DelayInfo)>,
    pub finished: bool,
}

impl Progress for RecordingProgress {
    fn begin(&mut self, total: usize) {
        self.total = Some(total);
    }

    fn page_done(&mut self, page: u32, rows: usize) {
        self.pages.push((page, rows));
    }

    fn train_done(&mut self, number: &String, outcome: &DelayInfo) {
        self.trains.push((number.clone(), outcome.clone()));
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

pub fn fast_list_settings() -> ListScraperSettings {
    ListScraperSettings {
        listing_url: "https://listing.test/frekwencja.html".to_string(),
        retry_ceiling: 4,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        backoff_jitter: false,
        rotate_user_agent: true,
        page_pause: (Duration::ZERO, Duration::ZERO),
        browser_timeout: Duration::from_millis(50),
    }
}

pub fn fast_detail_settings() -> DetailScraperSettings {
    DetailScraperSettings {
        search_timeout: Duration::from_millis(50),
        form_timeout: Duration::from_millis(50),
        route_timeout: Duration::from_millis(50),
        ..DetailScraperSettings::default()
    }
}

pub fn fast_orchestrator_settings(session_policy: SessionPolicy) -> OrchestratorSettings {
    OrchestratorSettings {
        navigation_timeout: Duration::from_millis(50),
        cookie_timeout: Duration::ZERO,
        session_policy,
        detail: fast_detail_settings(),
        ..OrchestratorSettings::default()
    }
}

pub fn listing_page(rows: &[[&str; 8]]) -> String {
    let body: String = rows
        .iter()
        .map(|cells| {
            let tds: String = cells.iter().map(|c| format!("<td>{c}</td>")).collect();
            format!("<tr>{tds}</tr>")
        })
        .collect();
    format!(
        "<html><body><table><tr><th>Rodzaj</th><th>Numer</th><th>Kategoria</th><th>Nazwa</th>\
         <th>Z</th><th></th><th>Do</th><th>Frekwencja</th></tr>{body}</table></body></html>"
    )
}

pub const EMPTY_LISTING: &str =
    "<html><body><table><tr><th>Numer</th></tr></table></body></html>";

pub const LANDING: &str = r#"<html><body>
  <button class="cookie">Akceptuj wszystkie</button>
  <span class="find-train-selector">po relacji</span>
  <ul><li>po relacji</li><li>po numerze</li></ul>
  <input id="ftn-number" />
  <button id="ftn-search" formaction="search/{number}">Szukaj</button>
</body></html>"#;

pub fn result_row(numbers: &str, carrier: &str, route: &str) -> String {
    format!(
        r#"<div class="catalog-table__row">
  <div class="col-1 col-6--phone"><strong><span>{numbers}</span></strong></div>
  <div>Relacja</div>
  <div>Odjazd</div>
  <div>Przyjazd</div>
  <div><strong class="item-value">{carrier}</strong></div>
  <a class="item-details loadScr" href="{route}">Szczegóły</a>
</div>"#
    )
}

pub fn results_page(rows: &[String]) -> String {
    format!(
        r#"<html><body><div class="catalog-table">{}</div></body></html>"#,
        rows.concat()
    )
}

pub const NO_TRAINS: &str = r#"<html><body>
  <h3>W obecnej dobie brak kursujących pociągów o podanym numerze</h3>
</body></html>"#;

pub const INVALID_NUMBER: &str = r#"<html><body>
  <div class="param-error">Wpisany numer pociągu jest nieprawidłowy</div>
</body></html>"#;

/// Three stops: origin, an intermediate stop with a difficulty, terminus.
pub const ROUTE: &str = r#"<html><body><div class="timeline">
  <div class="timeline__item">
    <h3 class="timeline__content-station">Stacja: Kraków Główny</h3>
    <span class="timeline__numbers-time__start">Odjazd
      12:05
      <span class="inlinedelay">(+3 min)</span>
      <span class="inlinedelay">(+5 min)</span>
    </span>
    <p class="timeline__numbers-km">Odległość
      12,5 km
      Czas przejazdu
      0h:15min</p>
  </div>
  <div class="timeline__item">
    <h3 class="timeline__content-station">Stacja: Tarnów</h3>
    <span class="timeline__numbers-time__stop">Przyjazd
      13:10
      <span class="inlinedelay">(+07 min)</span>
    </span>
    <span class="timeline__numbers-time__start">Odjazd
      13:12
    </span>
    <p class="timeline__numbers-km">Odległość
      78,3 km
      Czas przejazdu
      1h:05min</p>
    <button data-window-type="difficulties" data-obj-1="17###Tarnów$2024-01-15$Prace torowe$x">!</button>
  </div>
  <div class="timeline__item">
    <h3 class="timeline__content-station">Stacja: Rzeszów Główny</h3>
    <span class="timeline__numbers-time__stop">Przyjazd
      14:20
    </span>
  </div>
</div></body></html>"#;

/// A portal where 5306 is an IC train with [`ROUTE`], 105 is only run by another
/// carrier, and 999 does not run.
pub fn portal_site() -> Site {
    Site::new()
        .page(PORTAL_URL, LANDING)
        .page(
            "search/5306",
            &results_page(&[
                result_row("5310", "IC", "route/5310"),
                result_row("5305 5306", "IC", "route/5306"),
            ]),
        )
        .page("route/5306", ROUTE)
        .page(
            "search/105",
            &results_page(&[result_row("105", "KW", "route/105")]),
        )
        .page("search/999", NO_TRAINS)
        .page("search/12", INVALID_NUMBER)
}
