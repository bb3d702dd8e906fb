use indexmap::IndexMap;
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use seriesdash::normalize::{LabelSeries, Row};
use seriesdash::stats;
use seriesdash::{NormalizeOptions, Point, RawQueryResult, normalize};

fn rows(values: Vec<Value>) -> Vec<Row> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

#[test]
fn tabular_series_column_end_to_end() {
    let raw = RawQueryResult::Tabular(rows(vec![
        json!({"t": 1000, "series": "a", "value": 5}),
        json!({"t": 2000, "series": "a", "value": 7}),
    ]));

    let series = normalize(&raw, &NormalizeOptions::default());
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].name, "a");
    assert_eq!(series[0].points, vec![Point(1000, 5.0), Point(2000, 7.0)]);

    let legend = stats::compute(&series);
    let stat = &legend["a"];
    assert_eq!(stat.mean, Some(6.0));
    assert_eq!(stat.max, Some(7.0));
    assert_eq!(stat.last, Some(7.0));
}

#[test]
fn label_vector_end_to_end() {
    let mut labels = IndexMap::new();
    labels.insert("__name__".to_string(), "up".to_string());
    labels.insert("job".to_string(), "x".to_string());
    let raw = RawQueryResult::LabelVector(vec![LabelSeries {
        labels,
        samples: vec![json!(["1", "1"]), json!(["2", "0"])],
    }]);

    let series = normalize(&raw, &NormalizeOptions::default());
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].name, "up{job=x}");
    assert_eq!(
        serde_json::to_value(&series[0].points).expect("encode"),
        json!([[1000, 1.0], [2000, 0.0]])
    );
}

#[test]
fn label_vector_decodes_from_backend_json() {
    let body = json!({
        "status": "success",
        "data": {"resultType": "matrix", "result": [
            {"metric": {"__name__": "up", "job": "x"}, "values": [[1, "1"], [2, "0"]]},
            {"metric": {"job": "y"}, "values": [[1, "NaN"], [2, "bogus"]]}
        ]}
    });
    let decoded = seriesdash::dispatch::wire::decode_label_vector(body.to_string().as_bytes())
        .expect("decode");
    let series = normalize(
        &RawQueryResult::LabelVector(decoded),
        &NormalizeOptions::default(),
    );

    assert_eq!(series.len(), 2);
    assert_eq!(series[1].name, "series{job=y}");
    assert_eq!(series[1].points.len(), 1);
    assert!(series[1].points[0].value().is_nan());

    let legend = stats::compute(&series);
    assert_eq!(legend["series{job=y}"].mean, None);
    assert_eq!(stats::format_stat(legend["series{job=y}"].last), "N/A");
}

#[test]
fn normalizing_twice_yields_equal_output() {
    let raw = RawQueryResult::Tabular(rows(vec![
        json!({"ts": 3000, "cpu": 0.3, "mem": 10}),
        json!({"ts": 1000, "cpu": 0.1, "mem": 12}),
        json!({"ts": 2000, "name": "disk", "value": "4"}),
    ]));
    let options = NormalizeOptions::default();
    assert_eq!(normalize(&raw, &options), normalize(&raw, &options));
}

#[test]
fn composite_mode_names_and_suppresses() {
    let raw = RawQueryResult::Tabular(rows(vec![
        json!({"t": 1000, "host": "web1", "request": "GET", "status": "200", "value": 4}),
        json!({"t": 1000, "host": "web1", "request": "GET", "status": "all", "value": 9}),
        json!({"t": 2000, "cpu": 0.5}),
    ]));

    let series = normalize(&raw, &NormalizeOptions::composite());
    let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["{host=web1,request=GET,status=200}", "cpu"]);
    assert_eq!(series[0].points, vec![Point(1000, 4.0)]);
}

#[test]
fn same_name_across_rules_accumulates() {
    let raw = RawQueryResult::Tabular(rows(vec![
        json!({"t": 2000, "cpu": 2}),
        json!({"t": 1000, "series": "cpu", "value": 1}),
    ]));

    let series = normalize(&raw, &NormalizeOptions::default());
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].points, vec![Point(1000, 1.0), Point(2000, 2.0)]);
}

fn cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e12f64..1.0e12).prop_map(|n| json!(n)),
        "[a-z0-9:. -]{0,12}".prop_map(Value::String),
    ]
}

fn arbitrary_row() -> impl Strategy<Value = Row> {
    let key = prop_oneof![
        Just("t".to_string()),
        Just("ts".to_string()),
        Just("series".to_string()),
        Just("value".to_string()),
        Just("name".to_string()),
        "[a-z]{1,6}",
    ];
    proptest::collection::vec((key, cell()), 0..6)
        .prop_map(|pairs| pairs.into_iter().collect::<Map<String, Value>>())
}

proptest! {
    #[test]
    fn tabular_never_panics_and_keeps_points_sorted(input in proptest::collection::vec(arbitrary_row(), 0..20)) {
        let raw = RawQueryResult::Tabular(input);
        for options in [NormalizeOptions::default(), NormalizeOptions::composite()] {
            for series in normalize(&raw, &options) {
                prop_assert!(series.points.windows(2).all(|w| w[0].instant() <= w[1].instant()));
            }
        }
    }

    #[test]
    fn rows_without_timestamps_contribute_nothing(values in proptest::collection::vec(any::<i32>(), 0..10)) {
        let input = values
            .into_iter()
            .map(|v| {
                let mut row = Map::new();
                row.insert("value".into(), json!(v));
                row.insert("series".into(), json!("a"));
                row
            })
            .collect();
        prop_assert!(normalize(&RawQueryResult::Tabular(input), &NormalizeOptions::default()).is_empty());
    }
}
