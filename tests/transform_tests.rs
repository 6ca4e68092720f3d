// tests/transform_tests.rs
use serde_json::{json, Value};
use std::cell::RefCell;
use std::time::Duration;
use tamper_star::logging::TAMPER_TARGET;
use tamper_star::{EvalLimits, Record, StarlarkTamper, Tamper, TamperConfig, TamperError, TransformOutcome};

// Records land in the logging thread's buffer, so parallel tests stay apart.
thread_local! {
    static CAPTURED: RefCell<Vec<(log::Level, String, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED.with(|captured| {
            captured.borrow_mut().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ))
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

fn capture_logs() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
    CAPTURED.with(|captured| captured.borrow_mut().clear());
}

fn tamper_errors() -> Vec<String> {
    CAPTURED.with(|captured| {
        captured
            .borrow()
            .iter()
            .filter(|(level, target, _)| *level == log::Level::Error && target == TAMPER_TARGET)
            .map(|(_, _, message)| message.clone())
            .collect()
    })
}

fn tamper(code: &str) -> StarlarkTamper {
    StarlarkTamper::new(TamperConfig::new(code))
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_empty_code_is_pass_through() {
    let empty = tamper("");
    let unset: TamperConfig = serde_json::from_value(json!({})).unwrap();
    let unset = StarlarkTamper::new(unset);
    let rec = record(json!({"title": "T"}));

    for value in [json!("abc"), json!(null), json!([1, 2]), json!({"k": 1.5})] {
        assert_eq!(empty.transform(&value, None), value);
        assert_eq!(empty.transform(&value, Some(&rec)), value);
        assert_eq!(unset.transform(&value, Some(&rec)), value);
    }
    assert_eq!(empty.try_transform(&json!(1), None), TransformOutcome::Unchanged);
}

#[test]
fn test_uppercase() {
    assert_eq!(tamper("return value.upper()").transform(&json!("abc"), None), json!("ABC"));
    assert_eq!(tamper("return upper($value);").transform(&json!("abc"), None), json!("ABC"));
}

#[test]
fn test_default_configuration_passes_value_through() {
    let tamper = StarlarkTamper::new(StarlarkTamper::default_configuration());
    assert_eq!(tamper.configuration().code, "return value;");
    assert_eq!(tamper.transform(&json!({"a": [1]}), None), json!({"a": [1]}));
}

#[test]
fn test_cross_field_reference() {
    let rec = record(json!({"title": "T"}));
    assert_eq!(
        tamper(r#"return record["title"] + " - " + value"#).transform(&json!("x"), Some(&rec)),
        json!("T - x")
    );
    assert!(tamper(r#"return $item_data["title"] . " - " . $value;"#)
        .try_transform(&json!("x"), Some(&rec))
        .is_failure());
    assert_eq!(
        tamper(r#"return $item_data["title"] + " - " + $value;"#).transform(&json!("x"), Some(&rec)),
        json!("T - x")
    );
}

#[test]
fn test_absent_record_is_empty_mapping() {
    let counting = tamper("return len(record)");
    assert_eq!(counting.transform(&json!("x"), None), json!(0));
    let lookup = tamper("return record.get('title', 'none')");
    assert_eq!(lookup.transform(&json!("x"), None), json!("none"));
}

#[test]
fn test_no_return_falls_back() {
    capture_logs();
    for code in ["x = value + '!'", "return None", "# just a comment", "if False:\n    return 1"] {
        let tamper = tamper(code);
        assert_eq!(tamper.try_transform(&json!("v"), None), TransformOutcome::Unchanged, "{}", code);
        assert_eq!(tamper.transform(&json!("v"), None), json!("v"));
    }
    assert!(tamper_errors().is_empty());
}

#[test]
fn test_conditional_default() {
    let tamper = tamper(r#"return "Default" if is_empty(value) else value"#);
    assert_eq!(tamper.transform(&json!(""), None), json!("Default"));
    assert_eq!(tamper.transform(&json!("kept"), None), json!("kept"));
}

#[test]
fn test_runtime_errors_are_masked_and_logged_once() {
    let rec = record(json!({"n": 0}));
    for code in ["return 1 // record['n']", "return strtoupper(value)", "return value + 1", "return record['missing']"] {
        capture_logs();
        let tamper = tamper(code);
        assert_eq!(tamper.transform(&json!("v"), Some(&rec)), json!("v"), "{}", code);

        let errors = tamper_errors();
        assert_eq!(errors.len(), 1, "{}: {:?}", code, errors);
        assert!(errors[0].starts_with("starlark_callback tamper error:"), "{}", errors[0]);
    }
}

#[test]
fn test_syntax_error_in_stored_code_is_masked() {
    capture_logs();
    let tamper = tamper("return (value");
    assert!(matches!(
        tamper.try_transform(&json!(1), None),
        TransformOutcome::Failed(TamperError::Syntax(_))
    ));
    assert_eq!(tamper.transform(&json!(1), None), json!(1));
    assert_eq!(tamper_errors().len(), 1);
}

#[test]
fn test_idempotent_calls() {
    let rec = record(json!({"tags": ["a"], "title": "T"}));
    let tamper = tamper("record['tags'].append(value)\nreturn record['tags']");
    let first = tamper.transform(&json!("b"), Some(&rec));
    let second = tamper.transform(&json!("b"), Some(&rec));
    assert_eq!(first, json!(["a", "b"]));
    assert_eq!(first, second);
}

#[test]
fn test_value_types_round_trip() {
    let tamper = tamper("return value");
    for value in [json!(true), json!(-7), json!(2.5), json!(["a", 1, null]), json!({"k": {"n": [1]}})] {
        assert_eq!(tamper.transform(&value, None), value);
    }
}

#[test]
fn test_multiline_strings_keep_their_text() {
    assert_eq!(tamper("return \"\"\"a\nb\"\"\"").transform(&json!("v"), None), json!("a\nb"));
    let indented = tamper("    s = '''first\n  second\n'''\n    return s + value");
    assert_eq!(indented.transform(&json!("!"), None), json!("first\n  second\n!"));
}

#[test]
fn test_unsigned_integers_round_trip() {
    let identity = tamper("return value");
    assert_eq!(identity.transform(&json!(u64::MAX), None), json!(u64::MAX));
    assert_eq!(
        identity.try_transform(&json!(u64::MAX), None),
        TransformOutcome::Replaced(json!(18446744073709551615u64))
    );
    let past_i64 = json!(i64::MAX as u64 + 1);
    assert_eq!(
        tamper("return value + 1").transform(&past_i64, None),
        json!(i64::MAX as u64 + 2)
    );
}

#[test]
fn test_deeply_nested_input_passes_through() {
    // Close to serde_json's own recursion limit of 128.
    let mut nested = json!("leaf");
    for _ in 0..120 {
        nested = json!([nested]);
    }
    let text = serde_json::to_string(&nested).unwrap();
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(tamper("return value").transform(&parsed, None), parsed);
}

#[test]
fn test_host_capabilities_are_unreachable() {
    capture_logs();
    for code in [
        "return open('/etc/passwd').read()",
        "load('os', 'system')\nreturn system('true')",
        "return __import__('os')",
    ] {
        assert_eq!(tamper(code).transform(&json!("v"), None), json!("v"), "{}", code);
    }
    assert_eq!(tamper_errors().len(), 3);
}

#[test]
fn test_runaway_snippet_is_cut_off() {
    capture_logs();
    let tamper = StarlarkTamper::with_limits(
        TamperConfig::new("for i in range(1000000000):\n    value = i\nreturn value"),
        EvalLimits::with_time_budget(Duration::from_millis(50)),
    );
    let start = std::time::Instant::now();
    assert_eq!(tamper.transform(&json!("v"), None), json!("v"));
    assert!(start.elapsed() < Duration::from_secs(5));

    let errors = tamper_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("time budget"), "{}", errors[0]);
}

#[test]
fn test_inline_limits_still_mask_errors() {
    let tamper = StarlarkTamper::with_limits(TamperConfig::new("return value // 0"), EvalLimits::inline());
    assert_eq!(tamper.transform(&json!(4), None), json!(4));
    let ok = StarlarkTamper::with_limits(TamperConfig::new("return value // 2"), EvalLimits::inline());
    assert_eq!(ok.transform(&json!(4), None), json!(2));
}

#[test]
fn test_set_configuration_switches_behavior() {
    let mut tamper = StarlarkTamper::default();
    assert_eq!(tamper.transform(&json!("a"), None), json!("a"));
    tamper.set_configuration(TamperConfig::new("return value * 3"));
    assert_eq!(tamper.transform(&json!("a"), None), json!("aaa"));
    tamper.set_configuration(TamperConfig::new(""));
    assert_eq!(tamper.transform(&json!("a"), None), json!("a"));
}
