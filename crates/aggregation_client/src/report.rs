//! The flat text observation format.
//!
//! Producer input files carry one `key: value` pair per line. Values
//! are inferred in order as bool, integer, float, and finally plain
//! string. The query client renders observations back out in the same
//! shape, with strings quoted.

use crate::Observation;
use weathervane_api::{WvError, WvResult};

/// Parse a flat text observation into its JSON object form.
pub fn text_to_json(input: &str) -> WvResult<Observation> {
    let mut out = Observation::new();

    for line in input.lines() {
        let (key, value) = line.split_once(':').ok_or_else(|| {
            WvError::codec(format!("not a `key: value` line: {line:?}"))
        })?;
        out.insert(key.trim().to_string(), infer_value(value.trim()));
    }

    Ok(out)
}

/// Render a JSON observation as flat text, one `key: value` per line.
pub fn json_to_text(observation: &Observation) -> String {
    let mut out = String::new();
    for (key, value) in observation {
        match value {
            serde_json::Value::String(s) => {
                out.push_str(&format!("{key}: \"{s}\"\n"));
            }
            other => {
                out.push_str(&format!("{key}: {other}\n"));
            }
        }
    }
    out
}

fn infer_value(value: &str) -> serde_json::Value {
    if value.eq_ignore_ascii_case("true") {
        return true.into();
    }
    if value.eq_ignore_ascii_case("false") {
        return false.into();
    }
    if let Ok(v) = value.parse::<i64>() {
        return v.into();
    }
    if let Ok(v) = value.parse::<f64>() {
        return v.into();
    }
    value.into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_and_infers_types() {
        let obs = text_to_json(
            "id: IDS60901\n\
             name: Adelaide (West Terrace / ngayirdapira)\n\
             air_temp: 13.3\n\
             press: 1023\n\
             wind_dir: S\n\
             cloud: true\n",
        )
        .unwrap();

        assert_eq!("IDS60901", obs["id"]);
        assert_eq!(
            "Adelaide (West Terrace / ngayirdapira)",
            obs["name"],
        );
        assert_eq!(13.3, obs["air_temp"]);
        assert_eq!(1023, obs["press"]);
        assert_eq!("S", obs["wind_dir"]);
        assert_eq!(true, obs["cloud"]);
    }

    #[test]
    fn value_may_contain_colons() {
        let obs = text_to_json("local_date_time_full: 2023/10/01 16:00\n")
            .unwrap();
        assert_eq!("2023/10/01 16:00", obs["local_date_time_full"]);
    }

    #[test]
    fn line_without_colon_is_an_error() {
        assert!(text_to_json("id IDS60901").is_err());
    }

    #[test]
    fn empty_input_parses_to_an_empty_observation() {
        assert!(text_to_json("").unwrap().is_empty());
    }

    #[test]
    fn renders_strings_quoted_and_scalars_bare() {
        let obs = text_to_json("id: A\ntemp: 25\nok: true\n").unwrap();
        let text = json_to_text(&obs);
        assert!(text.contains("id: \"A\"\n"));
        assert!(text.contains("temp: 25\n"));
        assert!(text.contains("ok: true\n"));
    }
}
