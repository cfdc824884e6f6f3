//! Usage line decoding
//!
//! A line is `<streamName:version>\t<token>--<token>--...`. Tokens are coerced in schema
//! field order; an empty token or the literal `null` decodes to [`FieldValue::Null`].

use usagepipe_core::constants::{NULL_TOKEN, PAYLOAD_SEPARATOR, STREAM_KEY_SEPARATOR};
use usagepipe_core::{FieldType, FieldValue, PipelineError, PipelineResult, StreamSchema};

/// One raw usage line split into its stream key and undecoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLine<'a> {
    pub stream_key: &'a str,
    pub payload: &'a str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDecoder;

impl PayloadDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Split a line into stream key and payload.
    pub fn parse_line<'a>(&self, line: &'a str) -> PipelineResult<RawLine<'a>> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (stream_key, payload) = line.split_once(STREAM_KEY_SEPARATOR).ok_or_else(|| {
            PipelineError::MalformedRecord("line has no stream key separator".to_string())
        })?;

        let stream_key = stream_key.trim();
        if stream_key.is_empty() {
            return Err(PipelineError::MalformedRecord("empty stream key".to_string()));
        }

        Ok(RawLine {
            stream_key,
            payload,
        })
    }

    /// Decode a payload against a schema. The result has exactly `schema.len()` values.
    pub fn decode(&self, schema: &StreamSchema, payload: &str) -> PipelineResult<Vec<FieldValue>> {
        let tokens: Vec<&str> = payload.split(PAYLOAD_SEPARATOR).collect();
        if tokens.len() != schema.len() {
            return Err(PipelineError::MalformedRecord(format!(
                "{} expects {} fields, got {}",
                schema.stream_key(),
                schema.len(),
                tokens.len()
            )));
        }

        schema
            .fields
            .iter()
            .zip(tokens)
            .map(|(field, token)| {
                coerce(&field.field_type, token).map_err(|reason| {
                    PipelineError::MalformedRecord(format!(
                        "{}.{}: {}",
                        schema.stream_key(),
                        field.name,
                        reason
                    ))
                })
            })
            .collect()
    }
}

fn coerce(field_type: &FieldType, token: &str) -> Result<FieldValue, String> {
    if token.is_empty() || token == NULL_TOKEN {
        return Ok(FieldValue::Null);
    }

    match field_type {
        FieldType::Int => token
            .trim()
            .parse::<i32>()
            .map(FieldValue::Int)
            .map_err(|e| format!("invalid INT '{}': {}", token, e)),
        FieldType::Long => token
            .trim()
            .parse::<i64>()
            .map(FieldValue::Long)
            .map_err(|e| format!("invalid LONG '{}': {}", token, e)),
        FieldType::Bool => Ok(FieldValue::Bool(token.trim().eq_ignore_ascii_case("true"))),
        FieldType::String | FieldType::Other(_) => Ok(FieldValue::String(token.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usagepipe_core::SchemaField;

    fn schema() -> StreamSchema {
        StreamSchema::new(
            "org.wso2.apimgt.statistics.request",
            "3.0.0",
            vec![
                SchemaField::new("apiName", "STRING"),
                SchemaField::new("requestCount", "INT"),
                SchemaField::new("requestTime", "LONG"),
                SchemaField::new("throttledOut", "BOOL"),
                SchemaField::new("ratio", "DOUBLE"),
            ],
        )
    }

    #[test]
    fn test_decode_coerces_each_type() {
        let values = PayloadDecoder::new()
            .decode(&schema(), "PizzaAPI--3--1700000000000--TRUE--0.5")
            .unwrap();

        assert_eq!(
            values,
            vec![
                FieldValue::String("PizzaAPI".to_string()),
                FieldValue::Int(3),
                FieldValue::Long(1_700_000_000_000),
                FieldValue::Bool(true),
                FieldValue::String("0.5".to_string()),
            ]
        );
    }

    #[test]
    fn test_null_and_empty_tokens() {
        let values = PayloadDecoder::new()
            .decode(&schema(), "null----null--yes--")
            .unwrap();

        assert!(values[0].is_null());
        assert!(values[1].is_null());
        assert!(values[2].is_null());
        assert_eq!(values[3], FieldValue::Bool(false));
        assert!(values[4].is_null());
    }

    #[test]
    fn test_token_count_mismatch_is_malformed() {
        let decoder = PayloadDecoder::new();
        for payload in ["PizzaAPI--3--1", "PizzaAPI--3--1--true--0.5--extra"] {
            let err = decoder.decode(&schema(), payload).unwrap_err();
            assert!(matches!(err, PipelineError::MalformedRecord(_)), "{}", payload);
        }
    }

    #[test]
    fn test_unparseable_number_is_malformed() {
        let decoder = PayloadDecoder::new();
        assert!(decoder
            .decode(&schema(), "PizzaAPI--three--1--true--0.5")
            .is_err());
        // i32 overflow
        assert!(decoder
            .decode(&schema(), "PizzaAPI--3000000000--1--true--0.5")
            .is_err());
    }

    #[test]
    fn test_decoded_length_matches_schema() {
        let decoder = PayloadDecoder::new();
        let schema = schema();
        for payload in ["a--1--2--false--x", "--------", "null--null--null--null--null"] {
            assert_eq!(decoder.decode(&schema, payload).unwrap().len(), schema.len());
        }
    }

    #[test]
    fn test_parse_line() {
        let decoder = PayloadDecoder::new();
        let line = decoder
            .parse_line("org.wso2.apimgt.statistics.request:3.0.0\tPizzaAPI--3\r\n")
            .unwrap();
        assert_eq!(line.stream_key, "org.wso2.apimgt.statistics.request:3.0.0");
        assert_eq!(line.payload, "PizzaAPI--3");

        assert!(decoder.parse_line("no separator here").is_err());
        assert!(decoder.parse_line("\tpayload").is_err());
    }
}
