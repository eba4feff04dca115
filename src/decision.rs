//! # decision — Decision Normalizer
//!
//! Turns the model's free-form reply into one [`Decision`] per symbol.
//!
//! The parse is strict about shape (JSON object with an `action` token) and
//! total about outcome: anything that cannot be read becomes
//! [`Decision::fallback`] instead of an error, because the result gates
//! whether a trade goes ahead.
//!
//! Accepted reply shapes:
//! ```text
//! single:  { "action": "BUY_OPEN", "confidence": "HIGH", ... }
//! batch:   { "BTCUSDT": { ... }, "ETHUSDT": { ... } }
//!          { "decisions": [ { "symbol": "BTCUSDT", ... }, ... ] }
//!          [ { "symbol": "BTCUSDT", ... }, ... ]
//! ```
//! Markdown code fences and prose around the JSON are tolerated.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::{Action, Decision, DecisionSource};

pub const DEFAULT_TAKE_PROFIT_PCT: f64 = 5.0;
pub const DEFAULT_STOP_LOSS_PCT: f64 = -2.0;

// ─── Confidence ───────────────────────────────────────────────────────────────

/// Category token → score.  Unknown tokens are neutral 0.5.
pub fn confidence_from_str(s: &str) -> f64 {
    let token = s.trim().to_ascii_uppercase();
    match token.as_str() {
        "HIGH"   => 0.8,
        "MEDIUM" => 0.6,
        "LOW"    => 0.4,
        _ => token.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.5),
    }
}

/// Total conversion of any JSON value into a confidence score.
pub fn confidence_from_value(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()).unwrap_or(0.5),
        Value::String(s) => confidence_from_str(s),
        _ => 0.5,
    }
}

/// Bucket label for a score: ≥0.75 HIGH, ≥0.55 MEDIUM, otherwise LOW.
pub fn confidence_label(score: f64) -> &'static str {
    if score >= 0.75 {
        "HIGH"
    } else if score >= 0.55 {
        "MEDIUM"
    } else {
        "LOW"
    }
}

// ─── Field Helpers ────────────────────────────────────────────────────────────

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim_end_matches(['x', 'X']).parse().ok(),
        _ => None,
    }
    .filter(|x: &f64| x.is_finite())
}

/// Removes markdown fences and any prose around the outermost `open..close`
/// span.
fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(|inner| inner.trim_end().trim_end_matches("```").trim())
        .unwrap_or(text);

    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn parse_value(text: &str, open: char, close: char) -> Result<Value, String> {
    let json = extract_json(text, open, close).ok_or_else(|| format!("no '{open}' in reply"))?;
    serde_json::from_str::<Value>(json).map_err(|e| format!("invalid JSON: {e}"))
}

// ─── Single Decision ──────────────────────────────────────────────────────────

/// Builds a decision from one JSON object, or explains why it cannot.
fn decision_from_object(symbol: &str, obj: &Map<String, Value>) -> Result<Decision, String> {
    let token = obj
        .get("action")
        .or_else(|| obj.get("signal"))
        .and_then(Value::as_str)
        .ok_or("missing action")?;
    let action = Action::from_token(token).ok_or_else(|| format!("unknown action '{token}'"))?;

    let confidence = obj
        .get("confidence")
        .map(confidence_from_value)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    let leverage = number(obj.get("leverage"))
        .map(|l| l.round().max(0.0) as u32)
        .unwrap_or(1);

    let position_percent = number(obj.get("position_percent"))
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    let take_profit_percent = number(obj.get("take_profit_percent")).unwrap_or(DEFAULT_TAKE_PROFIT_PCT);
    let stop_loss_percent = number(obj.get("stop_loss_percent")).unwrap_or(DEFAULT_STOP_LOSS_PCT);

    let reason = obj
        .get("reason")
        .or_else(|| obj.get("rationale"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();

    Ok(Decision {
        symbol: symbol.to_string(),
        action,
        confidence,
        leverage,
        position_percent,
        take_profit_percent,
        stop_loss_percent,
        reason,
        source: DecisionSource::Parsed,
    })
}

/// Parses a single-symbol reply.  Never fails.
pub fn parse_single(symbol: &str, text: &str) -> Decision {
    let outcome = parse_value(text, '{', '}').and_then(|value| match value {
        Value::Object(obj) => decision_from_object(symbol, &obj),
        _ => Err("reply is not a JSON object".to_string()),
    });

    match outcome {
        Ok(decision) => {
            debug!(symbol, action = %decision.action, confidence = decision.confidence, "Decision parsed");
            decision
        }
        Err(detail) => {
            warn!(symbol, %detail, "⚠️ Could not parse AI decision — defaulting to HOLD");
            Decision::fallback(symbol, detail)
        }
    }
}

// ─── Batch Decisions ──────────────────────────────────────────────────────────

/// Collects per-symbol JSON objects out of any accepted batch shape.
fn batch_entries(value: Value) -> HashMap<String, Map<String, Value>> {
    let mut out = HashMap::new();
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("decisions") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(keyed)) => return keyed_entries(keyed),
            _ => return keyed_entries(obj),
        },
        _ => return out,
    };
    for item in list {
        if let Value::Object(obj) = item {
            if let Some(sym) = obj.get("symbol").and_then(Value::as_str) {
                out.insert(sym.trim().to_ascii_uppercase(), obj);
            }
        }
    }
    out
}

fn keyed_entries(obj: Map<String, Value>) -> HashMap<String, Map<String, Value>> {
    obj.into_iter()
        .filter_map(|(k, v)| match v {
            Value::Object(inner) => Some((k.trim().to_ascii_uppercase(), inner)),
            _ => None,
        })
        .collect()
}

/// Parses a batched reply.  Returns exactly one decision per requested
/// symbol, in the order given; symbols the model skipped get the fallback.
pub fn parse_batch(symbols: &[String], text: &str) -> Vec<Decision> {
    let parsed = parse_value(text, '{', '}').or_else(|_| parse_value(text, '[', ']'));

    let entries = match parsed {
        Ok(value) => batch_entries(value),
        Err(detail) => {
            warn!(%detail, "⚠️ Could not parse batched AI reply — every symbol defaults to HOLD");
            return symbols.iter().map(|s| Decision::fallback(s, detail.clone())).collect();
        }
    };

    symbols
        .iter()
        .map(|symbol| match entries.get(&symbol.to_ascii_uppercase()) {
            Some(obj) => decision_from_object(symbol, obj).unwrap_or_else(|detail| {
                warn!(symbol = %symbol, %detail, "⚠️ Unusable decision entry — defaulting to HOLD");
                Decision::fallback(symbol, detail)
            }),
            None => {
                warn!(symbol = %symbol, "⚠️ AI reply has no entry for symbol — defaulting to HOLD");
                Decision::fallback(symbol, "symbol missing from reply")
            }
        })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_categories() {
        assert_eq!(confidence_from_str("HIGH"), 0.8);
        assert_eq!(confidence_from_str(" medium "), 0.6);
        assert_eq!(confidence_from_str("Low"), 0.4);
        assert_eq!(confidence_from_str("VERY_HIGH"), 0.5);
        assert_eq!(confidence_from_str(""), 0.5);
    }

    #[test]
    fn test_confidence_values_are_total() {
        assert_eq!(confidence_from_value(&json!(0.73)), 0.73);
        assert_eq!(confidence_from_value(&json!(1)), 1.0);
        assert_eq!(confidence_from_value(&json!(null)), 0.5);
        assert_eq!(confidence_from_value(&json!(true)), 0.5);
        assert_eq!(confidence_from_value(&json!({"x": 1})), 0.5);
        assert_eq!(confidence_from_value(&json!("NaN")), 0.5);
    }

    #[test]
    fn test_confidence_bucket_round_trip() {
        let inputs = [
            json!("HIGH"), json!("MEDIUM"), json!("LOW"), json!("garbage"),
            json!(0.0), json!(0.3), json!(0.55), json!(0.74), json!(0.9), json!(1.0),
        ];
        for input in inputs {
            let first = confidence_from_value(&input);
            let label = confidence_label(first);
            let again = confidence_from_str(label);
            assert_eq!(confidence_label(again), label, "bucket drifted for {input}");
        }
        assert_eq!(confidence_from_str(confidence_label(0.8)), 0.8);
        assert_eq!(confidence_from_str(confidence_label(0.6)), 0.6);
        assert_eq!(confidence_from_str(confidence_label(0.4)), 0.4);
    }

    #[test]
    fn test_parse_single_full() {
        let text = r#"```json
{"action":"BUY_OPEN","confidence":"HIGH","leverage":5,"position_percent":10,
 "take_profit_percent":5,"stop_loss_percent":-2,"reason":"breakout"}
```"#;
        let d = parse_single("BTCUSDT", text);
        assert_eq!(d.action, Action::BuyOpen);
        assert_eq!(d.confidence, 0.8);
        assert_eq!(d.leverage, 5);
        assert_eq!(d.position_percent, 10.0);
        assert_eq!(d.reason, "breakout");
        assert_eq!(d.source, DecisionSource::Parsed);
    }

    #[test]
    fn test_parse_single_with_prose_and_string_numbers() {
        let text = "Here is my call:\n{\"action\": \"sell_open\", \"confidence\": \"0.7\", \"leverage\": \"3x\", \"position_percent\": \"15%\"}\nGood luck.";
        let d = parse_single("ETHUSDT", text);
        assert_eq!(d.action, Action::SellOpen);
        assert_eq!(d.confidence, 0.7);
        assert_eq!(d.leverage, 3);
        assert_eq!(d.position_percent, 15.0);
        assert_eq!(d.take_profit_percent, DEFAULT_TAKE_PROFIT_PCT);
        assert_eq!(d.stop_loss_percent, DEFAULT_STOP_LOSS_PCT);
    }

    #[test]
    fn test_no_action_token_defaults_to_hold() {
        for text in ["I think the market is choppy.", "{\"confidence\": \"HIGH\"}", "{\"action\": \"MOON\"}", "[1,2]", "", "{not json"] {
            let d = parse_single("BTCUSDT", text);
            assert_eq!(d.action, Action::Hold, "text: {text}");
            assert_eq!(d.confidence, 0.5);
            assert_eq!(d.leverage, 1);
            assert_eq!(d.position_percent, 0.0);
            assert_eq!(d.reason, "parse failure");
            assert!(d.is_fallback());
        }
    }

    #[test]
    fn test_out_of_range_leverage_is_preserved_for_risk_gate() {
        let d = parse_single("BTCUSDT", r#"{"action":"BUY_OPEN","leverage":150,"confidence":0.9}"#);
        assert_eq!(d.leverage, 150);
        let d = parse_single("BTCUSDT", r#"{"action":"BUY_OPEN","leverage":-3,"confidence":0.9}"#);
        assert_eq!(d.leverage, 0);
    }

    #[test]
    fn test_confidence_clamped_into_unit_interval() {
        let d = parse_single("BTCUSDT", r#"{"action":"HOLD","confidence":7}"#);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_parse_batch_keyed_object() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "SOLUSDT".to_string()];
        let text = r#"{"BTCUSDT": {"action": "HOLD", "confidence": "LOW", "reason": "range"},
                      "ethusdt": {"action": "CLOSE", "confidence": 0.3}}"#;
        let ds = parse_batch(&symbols, text);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds[0].action, Action::Hold);
        assert_eq!(ds[0].confidence, 0.4);
        assert_eq!(ds[1].symbol, "ETHUSDT");
        assert_eq!(ds[1].action, Action::Close);
        assert!(ds[2].is_fallback());
    }

    #[test]
    fn test_parse_batch_decision_list() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let text = r#"{"decisions": [
            {"symbol": "ETHUSDT", "action": "SELL_OPEN", "confidence": "MEDIUM", "leverage": 2, "position_percent": 5},
            {"symbol": "BTCUSDT", "action": "???"}
        ]}"#;
        let ds = parse_batch(&symbols, text);
        assert!(ds[0].is_fallback());
        assert_eq!(ds[1].action, Action::SellOpen);
        assert_eq!(ds[1].leverage, 2);
    }

    #[test]
    fn test_parse_batch_garbage_defaults_everything() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let ds = parse_batch(&symbols, "the model timed out");
        assert_eq!(ds.len(), 2);
        assert!(ds.iter().all(|d| d.action == Action::Hold && d.is_fallback()));
    }
}
