use log::{info, warn};

use crate::records::{DelayInfo, TrainNumber};

/// Progress events emitted while a run is underway. Frontends implement this to
/// surface status; every method defaults to doing nothing.
pub trait Progress {
    /// Called once the number of trains to enrich is known.
    fn begin(&mut self, _total: usize) {}

    /// A listing page was parsed into `rows` rows.
    fn page_done(&mut self, _page: u32, _rows: usize) {}

    /// One train finished, successfully or not.
    fn train_done(&mut self, _number: &TrainNumber, _outcome: &DelayInfo) {}

    /// Called at the end, successful or not.
    fn finish(&mut self) {}
}

/// A no-op progress sink.
pub struct NullProgress;
impl Progress for NullProgress {}

/// Forwards progress to the `log` facade.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: usize,
    done: usize,
    failed: usize,
}

impl Progress for LogProgress {
    fn begin(&mut self, total: usize) {
        self.total = total;
        info!("Enriching {total} trains with route and delay data");
    }

    fn page_done(&mut self, page: u32, rows: usize) {
        info!("Listing page {page}: {rows} trains");
    }

    fn train_done(&mut self, number: &TrainNumber, outcome: &DelayInfo) {
        self.done += 1;
        match outcome {
            DelayInfo::Stops(stops) => info!(
                "[{}/{}] train {number}: {} stops",
                self.done,
                self.total,
                stops.len()
            ),
            DelayInfo::Failed(failure) => {
                self.failed += 1;
                warn!(
                    "[{}/{}] train {number}: {failure}",
                    self.done, self.total
                );
            }
        }
    }

    fn finish(&mut self) {
        info!(
            "Finished: {} trains processed, {} without route data",
            self.done, self.failed
        );
    }
}
