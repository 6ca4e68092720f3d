// src/convert.rs - moving values across the JSON / Starlark boundary
use crate::error::TamperError;
use serde_json::Value as JsonValue;
use starlark::collections::SmallMap;
use starlark::values::dict::{Dict, DictRef};
use starlark::values::list::ListRef;
use starlark::values::tuple::TupleRef;
use starlark::values::{Heap, Value};

/// Nesting limit when reading values back out of the interpreter.
/// Starlark lists may contain themselves. Kept above serde_json's
/// recursion limit (128) so any parsed input value fits.
const MAX_DEPTH: usize = 256;

pub(crate) fn json_to_starlark_value<'v>(
    heap: &'v Heap,
    json: &JsonValue,
) -> anyhow::Result<Value<'v>> {
    match json {
        JsonValue::Null => Ok(Value::new_none()),
        JsonValue::Bool(b) => Ok(Value::new_bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(heap.alloc(i))
            } else if let Some(u) = n.as_u64() {
                Ok(heap.alloc(u))
            } else if let Some(f) = n.as_f64() {
                Ok(heap.alloc(f))
            } else {
                Ok(heap.alloc(n.to_string()))
            }
        }
        JsonValue::String(s) => Ok(heap.alloc(s.as_str())),
        JsonValue::Array(arr) => {
            let values = arr
                .iter()
                .map(|v| json_to_starlark_value(heap, v))
                .collect::<anyhow::Result<Vec<Value>>>()?;
            Ok(heap.alloc(values))
        }
        JsonValue::Object(obj) => {
            let mut content = SmallMap::new();
            for (k, v) in obj {
                let key = heap.alloc(k.as_str());
                let value = json_to_starlark_value(heap, v)?;
                content.insert_hashed(
                    key.get_hashed().map_err(|e| anyhow::anyhow!("{}", e))?,
                    value,
                );
            }
            Ok(heap.alloc(Dict::new(content)))
        }
    }
}

pub(crate) fn starlark_to_json_value(value: Value) -> Result<JsonValue, TamperError> {
    to_json(value, 0)
}

fn to_json(value: Value, depth: usize) -> Result<JsonValue, TamperError> {
    if depth > MAX_DEPTH {
        return Err(TamperError::Conversion(format!(
            "value nested deeper than {} levels",
            MAX_DEPTH
        )));
    }

    if value.is_none() {
        Ok(JsonValue::Null)
    } else if let Some(b) = value.unpack_bool() {
        Ok(JsonValue::Bool(b))
    } else if let Some(i) = value.unpack_i32() {
        Ok(JsonValue::from(i))
    } else if let Some(s) = value.unpack_str() {
        Ok(JsonValue::String(s.to_string()))
    } else if let Some(list) = ListRef::from_value(value) {
        list.iter()
            .map(|item| to_json(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array)
    } else if let Some(tuple) = TupleRef::from_value(value) {
        tuple
            .content()
            .iter()
            .map(|item| to_json(*item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array)
    } else if let Some(dict) = DictRef::from_value(value) {
        let mut obj = serde_json::Map::new();
        for (k, v) in dict.iter() {
            let key = match k.unpack_str() {
                Some(s) => s.to_string(),
                None => k.to_string(),
            };
            obj.insert(key, to_json(v, depth + 1)?);
        }
        Ok(JsonValue::Object(obj))
    } else {
        match value.get_type() {
            "int" => number_from_repr(&value.to_string()),
            "float" => float_from_repr(&value.to_string()),
            _ => Ok(JsonValue::String(value.to_string())),
        }
    }
}

// Ints beyond i32 only expose their decimal representation.
fn number_from_repr(repr: &str) -> Result<JsonValue, TamperError> {
    if let Ok(i) = repr.parse::<i64>() {
        return Ok(JsonValue::from(i));
    }
    match repr.parse::<u64>() {
        Ok(u) => Ok(JsonValue::from(u)),
        Err(_) => Err(TamperError::Conversion(format!(
            "integer {} does not fit in 64 bits",
            repr
        ))),
    }
}

fn float_from_repr(repr: &str) -> Result<JsonValue, TamperError> {
    repr.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .ok_or_else(|| TamperError::Conversion(format!("float {} has no JSON form", repr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use starlark::environment::{GlobalsBuilder, Module};
    use starlark::eval::Evaluator;
    use starlark::syntax::{AstModule, Dialect};

    fn eval_to_json(script: &str) -> Result<JsonValue, TamperError> {
        let globals = GlobalsBuilder::standard().build();
        let module = Module::new();
        let mut eval = Evaluator::new(&module);
        let ast = AstModule::parse("test", script.to_owned(), &Dialect::Extended)
            .map_err(|e| TamperError::Syntax(e.to_string()))?;
        let result = eval.eval_module(ast, &globals)?;
        starlark_to_json_value(result)
    }

    #[test]
    fn test_scalars_come_back_typed() {
        assert_eq!(eval_to_json("None").unwrap(), JsonValue::Null);
        assert_eq!(eval_to_json("True").unwrap(), json!(true));
        assert_eq!(eval_to_json("40 + 2").unwrap(), json!(42));
        assert_eq!(eval_to_json("1.5 * 2").unwrap(), json!(3.0));
        assert_eq!(eval_to_json("'abc'").unwrap(), json!("abc"));
    }

    #[test]
    fn test_large_ints_survive() {
        assert_eq!(
            eval_to_json("10000000000 * 3").unwrap(),
            json!(30000000000i64)
        );
        assert!(matches!(
            eval_to_json("10000000000 * 10000000000 * 10000000000"),
            Err(TamperError::Conversion(_))
        ));
    }

    #[test]
    fn test_unsigned_ints_stay_exact() {
        assert_eq!(
            eval_to_json("18446744073709551615").unwrap(),
            json!(18446744073709551615u64)
        );
        assert!(eval_to_json("18446744073709551616").is_err());

        let module = Module::new();
        let value = json_to_starlark_value(module.heap(), &json!(u64::MAX)).unwrap();
        assert_eq!(value.get_type(), "int");
        assert_eq!(starlark_to_json_value(value).unwrap(), json!(u64::MAX));
    }

    #[test]
    fn test_nesting_up_to_parser_limit() {
        let mut nested = json!(1);
        for _ in 0..128 {
            nested = json!({ "n": nested });
        }
        let module = Module::new();
        let value = json_to_starlark_value(module.heap(), &nested).unwrap();
        assert_eq!(starlark_to_json_value(value).unwrap(), nested);
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            eval_to_json("{'a': [1, (2, 'x')], 'b': None}").unwrap(),
            json!({"a": [1, [2, "x"]], "b": null})
        );
    }

    #[test]
    fn test_self_referencing_list_is_rejected() {
        let script = "def f():\n    a = []\n    a.append(a)\n    return a\nf()";
        assert!(matches!(
            eval_to_json(script),
            Err(TamperError::Conversion(_))
        ));
    }

    #[test]
    fn test_json_into_starlark_keeps_keys() {
        let module = Module::new();
        let heap = module.heap();
        let value = json_to_starlark_value(heap, &json!({"title": "T", "n": [1, 2.5]})).unwrap();
        let dict = DictRef::from_value(value).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(starlark_to_json_value(value).unwrap(), json!({"title": "T", "n": [1, 2.5]}));
    }
}
