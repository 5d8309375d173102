//! Line-oriented session driver: one verb per input line, one JSON line per reply.

use std::io::{BufRead, Write};

use anyhow::{anyhow, Result};
use hero_select_core::{DocumentSource, Session};
use hero_select_images::ImageProvider;
use serde_json::Value;

use crate::{error_json, parse_filter, selection_json, selections_from};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Flow {
    Continue,
    Quit,
}

/// Drive `session` from `input` until end of input or `quit`.
///
/// Verb failures are reported on `output` and the loop keeps going; only I/O
/// errors on the streams themselves end the run with an error.
///
/// # Errors
/// Returns an error when reading `input` or writing `output` fails.
pub fn run<I: BufRead, O: Write>(
    session: &mut Session,
    images: Option<&dyn ImageProvider>,
    input: I,
    mut output: O,
) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let (flow, reply) = match execute(session, images, verb, rest.trim()) {
            Ok((flow, reply)) => (flow, reply),
            Err(err) => {
                tracing::debug!(verb, error = %err, "session verb failed");
                (Flow::Continue, error_json(&err))
            }
        };
        writeln!(output, "{}", tag(verb, reply))?;
        output.flush()?;
        if flow == Flow::Quit {
            break;
        }
    }
    Ok(())
}

fn tag(verb: &str, reply: Value) -> Value {
    match reply {
        Value::Object(mut object) => {
            object.insert("verb".to_string(), Value::String(verb.to_string()));
            Value::Object(object)
        }
        other => serde_json::json!({ "verb": verb, "payload": other }),
    }
}

fn execute(
    session: &mut Session,
    images: Option<&dyn ImageProvider>,
    verb: &str,
    args: &str,
) -> Result<(Flow, Value)> {
    let reply = match verb {
        "select" => {
            let selection = session.select_one()?;
            serde_json::json!({ "selection": selection_json(&selection, images) })
        }
        "filter" => {
            let filters = args
                .split_whitespace()
                .map(parse_filter)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| anyhow!(err))?;
            let subset_size = session.apply_filters(selections_from(filters))?;
            serde_json::json!({ "subset_size": subset_size, "filters": session.selections() })
        }
        "clear-filters" => {
            session.clear_filters();
            serde_json::json!({ "subset_size": session.subset()?.len() })
        }
        "reset" => {
            session.reset();
            serde_json::json!({
                "subset_size": session.subset()?.len(),
                "filters": session.selections(),
            })
        }
        "reload" => {
            if args.is_empty() {
                return Err(anyhow!("reload needs a preferences path"));
            }
            let preferences = DocumentSource::from_path(std::path::Path::new(args))?;
            session.reload_preferences(preferences)?;
            serde_json::json!({
                "preferences": session.preferences_source().name(),
                "entity_count": session.catalog().len(),
            })
        }
        "probabilities" => {
            let entities = session
                .active_entities()?
                .into_iter()
                .map(|weighted| {
                    serde_json::json!({
                        "id": weighted.entity.id,
                        "probability": weighted.probability,
                    })
                })
                .collect::<Vec<_>>();
            serde_json::json!({ "entities": entities })
        }
        "status" => {
            let fingerprint = session.snapshot()?.fingerprint()?;
            serde_json::json!({
                "entity_count": session.catalog().len(),
                "subset_size": session.subset()?.len(),
                "filters": session.selections(),
                "fingerprint": fingerprint,
            })
        }
        "quit" | "exit" => return Ok((Flow::Quit, serde_json::json!({ "ok": true }))),
        other => return Err(anyhow!("unknown verb `{other}`")),
    };
    Ok((Flow::Continue, reply))
}
