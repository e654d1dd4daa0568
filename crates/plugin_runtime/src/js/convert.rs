//! Value conversion between QuickJS and serde_json

use rquickjs::{Ctx, IntoJs, Value as JsValue};
use serde_json::Value;

/// Nesting depth past which conversion gives up (guards cyclic objects)
const MAX_DEPTH: usize = 64;

/// Errors converting values across the engine boundary
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConvertError {
    #[error("Type conversion error: {0}")]
    Conversion(String),

    #[error("Value nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

pub(crate) type ConvertResult<T> = Result<T, ConvertError>;

fn conversion(err: rquickjs::Error) -> ConvertError {
    ConvertError::Conversion(err.to_string())
}

/// Convert a JavaScript value to JSON
pub(crate) fn js_to_json(js: &JsValue<'_>) -> ConvertResult<Value> {
    js_to_json_at(js, 0)
}

fn js_to_json_at(js: &JsValue<'_>, depth: usize) -> ConvertResult<Value> {
    if depth > MAX_DEPTH {
        return Err(ConvertError::TooDeep);
    }

    match js.type_of() {
        rquickjs::Type::Undefined | rquickjs::Type::Null => Ok(Value::Null),
        rquickjs::Type::Bool => {
            let b: bool = js.get().map_err(conversion)?;
            Ok(Value::Bool(b))
        }
        rquickjs::Type::Int => {
            let i: i32 = js.get().map_err(conversion)?;
            Ok(Value::from(i))
        }
        rquickjs::Type::Float => {
            let f: f64 = js.get().map_err(conversion)?;
            Ok(serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        rquickjs::Type::String => {
            let s: String = js.get().map_err(conversion)?;
            Ok(Value::String(s))
        }
        rquickjs::Type::Array => {
            let arr: rquickjs::Array = js.get().map_err(conversion)?;
            let mut values = Vec::with_capacity(arr.len());
            for i in 0..arr.len() {
                let item: JsValue = arr.get(i).map_err(conversion)?;
                values.push(js_to_json_at(&item, depth + 1)?);
            }
            Ok(Value::Array(values))
        }
        rquickjs::Type::Object => {
            let obj: rquickjs::Object = js.get().map_err(conversion)?;
            let mut fields = serde_json::Map::new();

            for prop in obj.props::<String, JsValue>() {
                let (key, val) = prop.map_err(conversion)?;
                if val.is_function() {
                    continue;
                }
                fields.insert(key, js_to_json_at(&val, depth + 1)?);
            }

            Ok(Value::Object(fields))
        }
        _ => Ok(Value::Null),
    }
}

/// Convert JSON to a JavaScript value
pub(crate) fn json_to_js<'js>(ctx: &Ctx<'js>, json: &Value) -> ConvertResult<JsValue<'js>> {
    match json {
        Value::Null => Ok(JsValue::new_null(ctx.clone())),
        Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(JsValue::new_int(ctx.clone(), i))
            } else if let Some(f) = n.as_f64() {
                Ok(JsValue::new_float(ctx.clone(), f))
            } else {
                Ok(JsValue::new_undefined(ctx.clone()))
            }
        }
        Value::String(s) => s.as_str().into_js(ctx).map_err(conversion),
        Value::Array(arr) => {
            let js_arr = rquickjs::Array::new(ctx.clone()).map_err(conversion)?;
            for (i, item) in arr.iter().enumerate() {
                let js_item = json_to_js(ctx, item)?;
                js_arr.set(i, js_item).map_err(conversion)?;
            }
            Ok(js_arr.into_value())
        }
        Value::Object(obj) => {
            let js_obj = rquickjs::Object::new(ctx.clone()).map_err(conversion)?;
            for (key, val) in obj {
                let js_val = json_to_js(ctx, val)?;
                js_obj.set(key.as_str(), js_val).map_err(conversion)?;
            }
            Ok(js_obj.into_value())
        }
    }
}

/// Render a value as display text: strings as-is, everything else as JSON
pub(crate) fn js_to_display(js: &JsValue<'_>) -> String {
    match js_to_json(js) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn with_ctx<F: FnOnce(Ctx<'_>)>(f: F) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(f);
    }

    #[test]
    fn test_js_to_json() {
        with_ctx(|ctx| {
            let value: JsValue = ctx
                .eval("({ name: 'scan', count: 3, ratio: 0.5, tags: ['a', 'b'], skip: undefined, f: function() {} })")
                .unwrap();
            let json = js_to_json(&value).unwrap();
            assert_eq!(
                json,
                json!({ "name": "scan", "count": 3, "ratio": 0.5, "tags": ["a", "b"], "skip": null })
            );
        });
    }

    #[test]
    fn test_json_into_js_and_back() {
        with_ctx(|ctx| {
            let input = json!({ "big": 5_000_000_000i64, "nested": { "ok": true, "none": null } });
            let js = json_to_js(&ctx, &input).unwrap();
            ctx.globals().set("value", js).unwrap();

            let big: f64 = ctx.eval("value.big").unwrap();
            assert_eq!(big, 5_000_000_000.0);
            let ok: bool = ctx.eval("value.nested.ok").unwrap();
            assert!(ok);
        });
    }

    #[test]
    fn test_cyclic_object_rejected() {
        with_ctx(|ctx| {
            let value: JsValue = ctx.eval("var a = {}; a.self = a; a").unwrap();
            assert!(matches!(js_to_json(&value), Err(ConvertError::TooDeep)));
        });
    }
}
