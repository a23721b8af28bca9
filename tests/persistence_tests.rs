use railscrape::{
    DelayFailure, DelayInfo, StopRecord, TrainRecord,
    persistence::{
        Difficulty, missing_route_reason, parse_difficulty, read_records_file, to_train_run,
        write_records_file,
    },
};

fn stop(name: &str, distance_to_next: Option<f64>, difficulty: [&str; 2]) -> StopRecord {
    StopRecord {
        station_name: name.to_string(),
        arrival_time: Some("12:00".to_string()),
        departure_time: Some("12:02".to_string()),
        delay_minutes_arrival: Some(2),
        delay_minutes_departure: None,
        distance_km_from_start_to_next: distance_to_next,
        travel_time_from_start_to_next: None,
        difficulties_info: difficulty.map(|s| Some(s.to_string())),
    }
}

fn train(name: &str, delay_info: Option<DelayInfo>) -> TrainRecord {
    TrainRecord {
        domestic: "Krajowy".to_string(),
        number: "5306".to_string(),
        category: "IC".to_string(),
        name: name.to_string(),
        from: "Kraków Główny".to_string(),
        to: "Rzeszów Główny".to_string(),
        occupancy: "Niska".to_string(),
        date: "2024-01-15".to_string(),
        delay_info,
    }
}

#[test]
fn distance_from_start_lags_one_stop() {
    let record = train(
        "KARPATY",
        Some(DelayInfo::Stops(vec![
            stop("Kraków Główny", Some(12.5), ["", ""]),
            stop("Tarnów", Some(78.3), ["Prace torowe", "Tarnów"]),
            stop("Rzeszów Główny", None, ["", ""]),
        ])),
    );

    let run = to_train_run(&record).unwrap();

    let distances: Vec<f64> = run.stops.iter().map(|s| s.distance_from_start_km).collect();
    assert_eq!(distances, [0.0, 12.5, 78.3]);
    let orders: Vec<i32> = run.stops.iter().map(|s| s.stop_order).collect();
    assert_eq!(orders, [1, 2, 3]);
    assert!(run.is_domestic);
    assert_eq!(run.start_station, "Kraków Główny");
    assert_eq!(run.stops[0].difficulty, None);
    assert_eq!(
        run.stops[1].difficulty,
        Some(Difficulty {
            description: "Prace torowe".to_string(),
            location: Some("Tarnów".to_string()),
        })
    );
}

#[test]
fn replacement_buses_are_not_stored() {
    assert_eq!(to_train_run(&train("ZKA PRZEMYŚL", None)), None);
}

#[test]
fn failed_trains_are_stored_without_stops() {
    let mut record = train("SOBIESKI", Some(DelayInfo::Failed(DelayFailure::NotAvailable)));
    record.domestic = "Międzynarodowy".to_string();

    let run = to_train_run(&record).unwrap();

    assert!(run.stops.is_empty());
    assert!(!run.is_domestic);
}

#[test]
fn location_embedded_in_reason() {
    let info = [Some("Awaria sieci##Dębica".to_string()), Some(String::new())];
    assert_eq!(
        parse_difficulty(&info),
        Some(Difficulty {
            description: "Awaria sieci".to_string(),
            location: Some("Dębica".to_string()),
        })
    );
}

#[test]
fn explicit_label_wins_over_embedded_location() {
    let info = [
        Some("Awaria sieci##Dębica".to_string()),
        Some("Ropczyce".to_string()),
    ];
    assert_eq!(
        parse_difficulty(&info).unwrap().location.as_deref(),
        Some("Ropczyce")
    );
}

#[test]
fn blank_reason_is_no_difficulty() {
    assert_eq!(parse_difficulty(&[Some("  ".to_string()), None]), None);
    assert_eq!(parse_difficulty(&[None, Some("Tarnów".to_string())]), None);
}

#[test]
fn records_file_keeps_outcomes() {
    let path = std::env::temp_dir().join(format!("railscrape-{}.json", std::process::id()));
    let records = vec![
        train(
            "KARPATY",
            Some(DelayInfo::Stops(vec![stop("Kraków Główny", Some(12.5), ["", ""])])),
        ),
        train("SOBIESKI", Some(DelayInfo::Failed(DelayFailure::PageLoadTimeout))),
        train("HETMAN", None),
    ];

    write_records_file(&path, &records).unwrap();
    let read_back = read_records_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(read_back, records);
}

#[test]
fn missing_records_file_is_an_error() {
    let path = std::env::temp_dir().join("railscrape-does-not-exist.json");
    assert!(read_records_file(&path).is_err());
}

#[test]
fn runs_without_stops_say_why() {
    let routed = train("KARPATY", Some(DelayInfo::Stops(vec![stop("Tarnów", None, ["", ""])])));
    assert_eq!(missing_route_reason(&routed), None);

    let failed = train("SOBIESKI", Some(DelayInfo::Failed(DelayFailure::NotFound)));
    assert_eq!(missing_route_reason(&failed).as_deref(), Some("not_found"));

    let unenriched = train("HETMAN", None);
    assert_eq!(missing_route_reason(&unenriched).as_deref(), Some("never enriched"));
}
