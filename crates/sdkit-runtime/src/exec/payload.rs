//! Parameter partitioning and API payload construction for the server
//! executor.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use sdkit_core::{FlagKind, FlagMap, RequestParam, ValueType};

/// Flags naming the init image for image-to-image requests.
const INIT_IMAGE_FLAGS: [&str; 2] = ["--init-img", "-i"];

/// Request parameters split by transport class.
#[derive(Debug)]
pub(crate) struct Partitioned {
    /// Server command line, starting with `--model <path>`. Feeds
    /// `ensure_running`; a change here restarts the server.
    pub startup_args: Vec<String>,
    /// Parameters carried per request (standard or injected).
    pub api_params: Vec<RequestParam>,
    /// Init image path, when one of the init flags was present.
    pub init_image: Option<PathBuf>,
}

/// Split request parameters according to the flag mapping. Unmapped
/// flags default to the injected side channel; flags the server cannot
/// handle at all are dropped here (executor selection should have
/// steered such requests to the CLI path already).
pub(crate) fn partition_params(
    model_path: &Path,
    params: &[RequestParam],
    mapping: &FlagMap,
) -> Partitioned {
    let mut startup_args = vec!["--model".to_string(), model_path.display().to_string()];
    let mut api_params = Vec::new();
    let mut init_image = None;

    for p in params {
        let value = p.value.as_deref().map(str::trim).unwrap_or_default();
        if INIT_IMAGE_FLAGS.contains(&p.flag.as_str()) {
            init_image = Some(PathBuf::from(value));
        }
        match mapping.get(&p.flag).map(|r| r.kind) {
            Some(FlagKind::StartupArg) => {
                startup_args.push(p.flag.clone());
                if !value.is_empty() {
                    startup_args.push(value.to_string());
                }
            }
            Some(FlagKind::ApiStandard | FlagKind::ApiInjected) | None => {
                api_params.push(p.clone());
            }
            Some(FlagKind::Unsupported) => {}
        }
    }

    Partitioned {
        startup_args,
        api_params,
        init_image,
    }
}

/// Build the generation payload and the realized seed.
///
/// The seed comes from `--seed` when given (an empty value counts as 0);
/// absent or unparseable values draw uniformly from the full u32 range.
/// Either way it is written into both the standard payload and the side
/// channel so the caller always learns it.
/// Injected parameters are serialized as JSON and appended to the prompt
/// behind the `<sd_cpp_extra_args>` tag. Whether the backend strips that
/// tag before generation or lets it leak into the effective prompt is a
/// known ambiguity of the protocol; the tag shape must not be changed.
pub(crate) fn build_payload(
    prompt: &str,
    api_params: &[RequestParam],
    mapping: &FlagMap,
) -> (Map<String, Value>, i64) {
    let mut std_fields = Map::new();
    let mut injected = Map::new();
    let mut seed: i64 = -1;

    for p in api_params {
        let raw = p.value.as_deref().map(str::trim).unwrap_or_default();
        if p.flag == "--seed" {
            // An empty value means seed 0; only an unparseable or -1
            // value falls through to the random draw
            seed = if raw.is_empty() {
                0
            } else {
                raw.parse().unwrap_or(-1)
            };
            continue;
        }
        let key = mapping.api_key(&p.flag);
        let rule = mapping.get(&p.flag);
        let value = coerce_value(raw, rule.map_or(ValueType::Text, |r| r.value_type));
        match rule.map_or(FlagKind::ApiInjected, |r| r.kind) {
            FlagKind::ApiStandard => {
                std_fields.insert(key, value);
            }
            _ => {
                injected.insert(key, value);
            }
        }
    }

    if seed == -1 {
        seed = i64::from(rand::random::<u32>());
    }
    std_fields.insert("seed".to_string(), Value::from(seed));
    injected.insert("seed".to_string(), Value::from(seed));

    let extra_json = Value::Object(injected).to_string();
    let full_prompt = format!("{prompt} <sd_cpp_extra_args>{extra_json}</sd_cpp_extra_args>");

    let mut payload = Map::new();
    payload.insert("prompt".to_string(), Value::from(full_prompt));
    payload.insert("output_format".to_string(), Value::from("png"));

    // The API takes one "WxH" size field instead of separate dimensions
    if std_fields.contains_key("width") && std_fields.contains_key("height") {
        let width = std_fields.remove("width").unwrap_or_default();
        let height = std_fields.remove("height").unwrap_or_default();
        payload.insert(
            "size".to_string(),
            Value::from(format!("{}x{}", value_text(&width), value_text(&height))),
        );
    }
    payload.extend(std_fields);

    (payload, seed)
}

/// Coerce to the declared type; parse failure passes the raw text
/// through rather than aborting the request.
fn coerce_value(raw: &str, value_type: ValueType) -> Value {
    if raw.is_empty() {
        return Value::from("");
    }
    match value_type {
        ValueType::Int => raw
            .parse::<f64>()
            .map(|f| Value::from(f as i64))
            .unwrap_or_else(|_| Value::from(raw)),
        ValueType::Float => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw)),
        ValueType::Text => Value::from(raw),
    }
}

/// Render a JSON value the way it should appear inside a composite
/// string field (no quotes around strings).
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
