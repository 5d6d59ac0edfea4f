mod common;

use proptest::prelude::*;

use revenue_pipeline::{
    clean::{MultiProductGroup, cap_values, clean},
    config::{
        COVERAGE, DuplicatePolicy, MARKET_SHARE, PipelineConfig, SUBSCRIBERS,
    },
    dataset::{Column, Dataset, Value},
    error::PipelineError,
    observer::{RecordingObserver, StageEvent},
    summary,
};

use common::{SALES_FIXTURE, load_fixture, sales_table};

fn numbers(dataset: &Dataset, column: &str) -> Vec<f64> {
    dataset
        .column(column)
        .expect("column")
        .values
        .iter()
        .map(|v| v.as_number().expect("numeric cell"))
        .collect()
}

fn config_with(policy: DuplicatePolicy) -> PipelineConfig {
    PipelineConfig {
        duplicates: policy,
        ..PipelineConfig::default()
    }
}

#[test]
fn negative_subscriber_count_takes_the_column_median() {
    let dataset = sales_table(&[
        "2023,Q1,Asia,A,Yes,10,100,10,10,50",
        "2023,Q2,Asia,A,Yes,10,100,10,20,50",
        "2023,Q3,Asia,A,Yes,10,100,10,-5,50",
        "2023,Q4,Asia,A,Yes,10,100,10,30,50",
    ]);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &PipelineConfig::default(), &mut observer).expect("clean");
    assert_eq!(numbers(&cleaned.dataset, SUBSCRIBERS), vec![10.0, 20.0, 20.0, 30.0]);
    assert!(observer.events.contains(&StageEvent::NegativesImputed {
        column: SUBSCRIBERS.to_string(),
        negatives: 1,
        previously_missing: 0,
        median: 20.0,
    }));
}

#[test]
fn na_placeholder_is_treated_as_missing_not_text() {
    let dataset = sales_table(&[
        "2023,Q1,Asia,A,Yes,10,100,10,10,50",
        "2023,Q2,Asia,A,Yes,10,100,10,NA,50",
        "2023,Q3,Asia,A,Yes,10,100,10,-5,50",
        "2023,Q4,Asia,A,Yes,10,100,10,30,50",
    ]);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &PipelineConfig::default(), &mut observer).expect("clean");
    assert_eq!(numbers(&cleaned.dataset, SUBSCRIBERS), vec![10.0, 20.0, 20.0, 30.0]);
    assert!(observer.events.contains(&StageEvent::NegativesImputed {
        column: SUBSCRIBERS.to_string(),
        negatives: 1,
        previously_missing: 1,
        median: 20.0,
    }));
}

#[test]
fn coverage_above_one_hundred_is_capped() {
    let dataset = sales_table(&["2023,Q1,Asia,A,Yes,10,100,10,10,115"]);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &PipelineConfig::default(), &mut observer).expect("clean");
    assert_eq!(numbers(&cleaned.dataset, COVERAGE), vec![100.0]);
    assert_eq!(cleaned.report.capped[0].exceeding, 1);
}

#[test]
fn strict_policy_keeps_one_of_two_identical_rows() {
    let dataset = sales_table(&[
        "2023,Q1,Asia,A,Yes,10,100,10,10,50",
        "2023,Q1,Asia,A,Yes,10,100,10,10,50",
        "2023,Q2,Asia,A,Yes,10,100,10,10,50",
    ]);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &config_with(DuplicatePolicy::Strict), &mut observer)
        .expect("clean");
    assert_eq!(cleaned.dataset.row_count(), 2);
    assert_eq!(cleaned.report.duplicates_removed, 1);
    assert_eq!(
        observer.events.last(),
        Some(&StageEvent::DuplicatesRemoved { removed: 1 })
    );
}

#[test]
fn duplicates_are_judged_after_repairs() {
    // Both rows become identical once the negative share is imputed.
    let dataset = sales_table(&[
        "2023,Q1,Asia,A,Yes,10,100,10,10,50",
        "2023,Q1,Asia,A,Yes,10,100,-1,10,50",
    ]);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &PipelineConfig::default(), &mut observer).expect("clean");
    assert_eq!(cleaned.dataset.row_count(), 1);
}

#[test]
fn lenient_policy_reports_groups_and_keeps_rows() {
    let dataset = load_fixture(SALES_FIXTURE);
    let rows = dataset.row_count();
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &config_with(DuplicatePolicy::Lenient), &mut observer)
        .expect("clean");

    assert_eq!(cleaned.dataset.row_count(), rows);
    assert_eq!(cleaned.report.duplicates_removed, 0);
    assert_eq!(cleaned.report.duplicates_retained, 1);
    assert_eq!(
        cleaned.report.multi_product_groups,
        vec![MultiProductGroup {
            key: vec!["2023".into(), "Q1".into(), "North America".into()],
            products: vec!["Galaxy 5G".into(), "Pixel 5G".into()],
            rows: 2,
        }]
    );
    assert!(matches!(
        observer.events.get(1),
        Some(StageEvent::MultiProductGroup { .. })
    ));
}

#[test]
fn fixture_report_counts_every_repair() {
    let dataset = load_fixture(SALES_FIXTURE);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &PipelineConfig::default(), &mut observer).expect("clean");
    let report = &cleaned.report;

    assert_eq!(report.rows_in, 26);
    assert_eq!(report.rows_out, 25);
    let negatives = report
        .negatives
        .iter()
        .map(|r| (r.column.as_str(), r.negatives))
        .collect::<Vec<_>>();
    assert_eq!(negatives, vec![(SUBSCRIBERS, 2), (MARKET_SHARE, 1)]);
    let capped = report
        .capped
        .iter()
        .map(|r| (r.column.as_str(), r.exceeding))
        .collect::<Vec<_>>();
    assert_eq!(capped, vec![(COVERAGE, 2), (MARKET_SHARE, 1)]);
    let quarter = report
        .domains
        .iter()
        .find(|d| d.column == "Quarter")
        .expect("quarter domain");
    assert_eq!(quarter.values, vec!["Q1", "Q2", "Q3", "Q4"]);
    assert!(quarter.unexpected.is_empty());

    for column in [SUBSCRIBERS, MARKET_SHARE] {
        assert!(numbers(&cleaned.dataset, column).iter().all(|v| *v >= 0.0));
    }
    for column in [COVERAGE, MARKET_SHARE] {
        assert!(numbers(&cleaned.dataset, column).iter().all(|v| *v <= 100.0));
    }
}

#[test]
fn stray_categories_are_reported_not_changed() {
    let dataset = sales_table(&[
        "2023,Q1,Asia,A,Yes,10,100,10,10,50",
        "2023,Q5,Asia,A,Yes,10,100,10,10,50",
    ]);
    let mut observer = RecordingObserver::new();
    let cleaned = clean(dataset, &PipelineConfig::default(), &mut observer).expect("clean");
    assert!(observer.events.contains(&StageEvent::UnexpectedCategories {
        column: "Quarter".into(),
        values: vec!["Q5".into()],
    }));
    assert_eq!(
        cleaned.dataset.column("Quarter").unwrap().values[1],
        Value::Text("Q5".into())
    );
}

#[test]
fn all_negative_column_cannot_be_imputed() {
    let dataset = sales_table(&[
        "2023,Q1,Asia,A,Yes,10,100,10,-1,50",
        "2023,Q2,Asia,A,Yes,10,100,10,-2,50",
    ]);
    let mut observer = RecordingObserver::new();
    let err = clean(dataset, &PipelineConfig::default(), &mut observer).unwrap_err();
    assert_eq!(
        err,
        PipelineError::UndefinedImputation {
            column: SUBSCRIBERS.into()
        }
    );
}

#[test]
fn text_in_numeric_column_is_fatal() {
    let dataset = sales_table(&["2023,Q1,Asia,A,Yes,10,100,ten,10,50"]);
    let mut observer = RecordingObserver::new();
    let err = clean(dataset, &PipelineConfig::default(), &mut observer).unwrap_err();
    assert_eq!(
        err,
        PipelineError::NonNumericValue {
            column: MARKET_SHARE.into(),
            row: 1,
            value: "ten".into(),
        }
    );
}

#[test]
fn header_only_input_is_rejected() {
    let dataset = sales_table(&[]);
    let mut observer = RecordingObserver::new();
    let err = clean(dataset, &PipelineConfig::default(), &mut observer).unwrap_err();
    assert_eq!(err, PipelineError::EmptyDataset);
}

fn subscriber_rows() -> impl Strategy<Value = Vec<(f64, f64, f64)>> {
    proptest::collection::vec(
        (
            prop_oneof![3 => 0.0f64..500.0, 1 => -100.0f64..0.0],
            -20.0f64..150.0,
            0.0f64..200.0,
        ),
        1..40,
    )
    .prop_filter("at least one non-negative subscriber and share", |rows| {
        rows.iter().any(|r| r.0 >= 0.0) && rows.iter().any(|r| r.1 >= 0.0)
    })
}

fn table_from(rows: &[(f64, f64, f64)]) -> Dataset {
    let lines = rows
        .iter()
        .enumerate()
        .map(|(idx, (subs, share, coverage))| {
            format!("2023,Q{},Asia,A,Yes,10,100,{share},{subs},{coverage}", idx % 4 + 1)
        })
        .collect::<Vec<_>>();
    sales_table(&lines.iter().map(String::as_str).collect::<Vec<_>>())
}

proptest! {
    #[test]
    fn cleaned_values_respect_bounds_and_medians(rows in subscriber_rows()) {
        let dataset = table_from(&rows);
        let mut observer = RecordingObserver::new();
        let cleaned = clean(dataset, &config_with(DuplicatePolicy::Lenient), &mut observer)
            .expect("clean");

        let kept = rows.iter().map(|r| r.0).filter(|v| *v >= 0.0).collect::<Vec<_>>();
        let median = summary::median(&kept).expect("median");
        let subscribers = numbers(&cleaned.dataset, SUBSCRIBERS);
        for (original, cleaned) in rows.iter().map(|r| r.0).zip(&subscribers) {
            prop_assert!(*cleaned >= 0.0);
            if original < 0.0 {
                prop_assert_eq!(*cleaned, median);
            }
        }
        for value in numbers(&cleaned.dataset, MARKET_SHARE) {
            prop_assert!((0.0..=100.0).contains(&value));
        }
        for value in numbers(&cleaned.dataset, COVERAGE) {
            prop_assert!(value <= 100.0);
        }
        prop_assert_eq!(cleaned.dataset.row_count(), rows.len());
    }

    #[test]
    fn capping_twice_changes_nothing(values in proptest::collection::vec(-50.0f64..300.0, 0..50)) {
        let mut once = Column::numbers(COVERAGE, &values);
        cap_values(&mut once, 100.0).expect("cap");
        let mut twice = once.clone();
        let changed = cap_values(&mut twice, 100.0).expect("cap again");
        prop_assert_eq!(changed, 0);
        prop_assert_eq!(once, twice);
    }
}
