use crate::convert::{json_to_starlark_value, starlark_to_json_value};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use starlark::environment::{Globals, GlobalsBuilder};
use starlark::starlark_module;
use starlark::values::tuple::UnpackTuple;
use starlark::values::{Heap, Value};
use std::collections::HashMap;
use std::sync::Mutex;

// Compiled patterns shared by every evaluation in the process
static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Patterns can come from record data, so the cache starts over once it
/// holds this many.
const REGEX_CACHE_LIMIT: usize = 256;

fn get_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE
        .lock()
        .map_err(|_| anyhow::anyhow!("regex cache poisoned"))?;

    if let Some(regex) = cache.get(pattern) {
        Ok(regex.clone())
    } else {
        let regex = Regex::new(pattern)?;
        if cache.len() >= REGEX_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

/// Globals visible to snippets: Starlark's standard library plus the
/// helpers below. Nothing here touches files, sockets, clocks or the
/// process environment.
pub fn snippet_globals() -> Globals {
    GlobalsBuilder::standard().with(tamper_functions).build()
}

/// Names of the helpers added on top of the standard library.
pub const HELPER_NAMES: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "is_empty",
    "coalesce",
    "regex_match",
    "regex_replace",
    "parse_json",
    "dump_json",
];

/// Emptiness the way import data usually means it: None, False, zero,
/// "", "0" and empty containers.
fn value_is_empty(value: Value) -> bool {
    !value.to_bool() || value.unpack_str() == Some("0")
}

#[starlark_module]
fn tamper_functions(builder: &mut GlobalsBuilder) {
    /// Uppercase a string
    fn upper(text: String) -> anyhow::Result<String> {
        Ok(text.to_uppercase())
    }

    fn lower(text: String) -> anyhow::Result<String> {
        Ok(text.to_lowercase())
    }

    /// Strip leading and trailing whitespace
    fn trim(text: String) -> anyhow::Result<String> {
        Ok(text.trim().to_string())
    }

    fn is_empty<'v>(value: Value<'v>) -> anyhow::Result<bool> {
        Ok(value_is_empty(value))
    }

    /// First argument that is not empty, or None
    fn coalesce<'v>(#[starlark(args)] args: UnpackTuple<Value<'v>>) -> anyhow::Result<Value<'v>> {
        Ok(args
            .items
            .into_iter()
            .find(|v| !value_is_empty(*v))
            .unwrap_or_else(Value::new_none))
    }

    fn regex_match(pattern: String, text: String) -> anyhow::Result<bool> {
        Ok(get_regex(&pattern)?.is_match(&text))
    }

    fn regex_replace(pattern: String, replacement: String, text: String) -> anyhow::Result<String> {
        let regex = get_regex(&pattern)?;
        Ok(regex.replace_all(&text, replacement.as_str()).into_owned())
    }

    fn parse_json<'v>(heap: &'v Heap, text: String) -> anyhow::Result<Value<'v>> {
        let json_value: serde_json::Value = serde_json::from_str(&text)?;
        json_to_starlark_value(heap, &json_value)
    }

    fn dump_json(value: Value) -> anyhow::Result<String> {
        let json_value = starlark_to_json_value(value)?;
        Ok(serde_json::to_string(&json_value)?)
    }
}
