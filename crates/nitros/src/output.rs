use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nitros_codec::{Message, NdArray};
use nitros_discovery::TopicInfo;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_topics(topics: &[TopicInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&topics),
        _ if topics.is_empty() => println!("No active topics found."),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "TOPIC",
                    "ENDPOINT",
                    "KIND",
                    "COMPRESSION",
                    "SUBSCRIBERS",
                    "RATE",
                ]);
            for info in topics {
                table.add_row(vec![
                    info.topic.clone(),
                    info.endpoint.to_string(),
                    kind_name(info),
                    info.compression.to_string(),
                    info.connections.to_string(),
                    format_rate(info.rate_hz),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let width = topics.iter().map(|t| t.topic.len()).max().unwrap_or(0).max(5);
            println!("{:<width$}  ENDPOINT", "TOPIC");
            for info in topics {
                println!(
                    "{:<width$}  {}  kind={} rate={}",
                    info.topic,
                    info.endpoint,
                    kind_name(info),
                    format_rate(info.rate_hz)
                );
            }
        }
    }
}

pub fn print_topic_info(info: &TopicInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Topic:        {}", info.topic);
            println!("Endpoint:     {}", info.endpoint);
            println!("Kind:         {}", kind_name(info));
            println!("Compression:  {}", info.compression);
            println!("Subscribers:  {}", info.connections);
            println!("Rate:         {}", format_rate(info.rate_hz));
            println!("Registered:   {} ms since epoch", info.registered_ms);
            println!(
                "Origin:       {}",
                if info.local { "this process" } else { "remote" }
            );
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageOutput<'a> {
    Structured {
        timestamp_ms: u64,
        value: &'a nitros_codec::Value,
    },
    Array {
        timestamp_ms: u64,
        dtype: &'static str,
        shape: &'a [usize],
        #[serde(flatten)]
        stats: Option<ArrayStats>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct ArrayStats {
    min: f64,
    max: f64,
    mean: f64,
}

fn array_stats(array: &NdArray) -> Option<ArrayStats> {
    let values = array.to_f64_vec();
    if values.is_empty() {
        return None;
    }
    let (min, max, sum) = values.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), v| (min.min(*v), max.max(*v), sum + v),
    );
    Some(ArrayStats {
        min,
        max,
        mean: sum / values.len() as f64,
    })
}

pub fn print_message(message: &Message, format: OutputFormat) {
    let timestamp_ms = now_unix_millis();
    match (message, format) {
        (Message::Structured(value), OutputFormat::Json) => print_json(&MessageOutput::Structured {
            timestamp_ms,
            value,
        }),
        (Message::Array(array), OutputFormat::Json) => print_json(&MessageOutput::Array {
            timestamp_ms,
            dtype: array.dtype().name(),
            shape: array.shape(),
            stats: array_stats(array),
        }),
        (Message::Structured(value), _) => {
            let text = serde_json::to_string_pretty(value)
                .unwrap_or_else(|err| format!("<unprintable value: {err}>"));
            println!("{text}\n---");
        }
        (Message::Array(array), _) => {
            let stats = array_stats(array)
                .map(|s| format!(" min={:.4} max={:.4} mean={:.4}", s.min, s.max, s.mean))
                .unwrap_or_default();
            println!("array<{}> shape={:?}{stats}\n---", array.dtype(), array.shape());
        }
    }
}

pub fn format_rate(rate_hz: Option<f64>) -> String {
    match rate_hz {
        Some(hz) => format!("{hz:.1} Hz"),
        None => "-".to_string(),
    }
}

fn kind_name(info: &TopicInfo) -> String {
    info.kind
        .map(|k| k.name().to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use nitros_codec::DType;

    use super::*;

    #[test]
    fn rate_formatting() {
        assert_eq!(format_rate(Some(9.96)), "10.0 Hz");
        assert_eq!(format_rate(None), "-");
    }

    #[test]
    fn stats_over_array() {
        let array = NdArray::from_vec(vec![4], vec![1.0f32, 2.0, 3.0, 6.0]).unwrap();
        let stats = array_stats(&array).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 6.0);
        assert_eq!(stats.mean, 3.0);
    }

    #[test]
    fn empty_array_has_no_stats() {
        let array = NdArray::new(DType::U8, vec![0, 3], Vec::<u8>::new()).unwrap();
        assert!(array_stats(&array).is_none());
    }

    #[test]
    fn array_output_json_shape() {
        let array = NdArray::from_vec(vec![2, 3], vec![0u8; 6]).unwrap();
        let out = MessageOutput::Array {
            timestamp_ms: 1,
            dtype: array.dtype().name(),
            shape: array.shape(),
            stats: array_stats(&array),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["type"], "array");
        assert_eq!(json["dtype"], "uint8");
        assert_eq!(json["shape"], serde_json::json!([2, 3]));
        assert_eq!(json["max"], 0.0);
    }
}
