use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One merged status snapshot of the hosted server.
///
/// Built from the hosting API's `status` document and the telemetry feed.
/// Fields the remote side did not send stay `None`. Values of the wrong type
/// are coerced where that is unambiguous and dropped otherwise, so one odd
/// field never costs the whole snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerStatus {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub hostname: Option<String>,
    #[serde(rename = "is_running", default, deserialize_with = "lenient::opt_bool")]
    pub running: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub map: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub port: Option<u64>,
    /// Players currently connected.
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub players: Option<u64>,
    /// Player slots.
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub slots: Option<u64>,
    #[serde(default, deserialize_with = "lenient::vec_or_null")]
    pub players_list: Vec<Player>,
    /// Percent.
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub cpu_usage: Option<f64>,
    /// Bytes.
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub memory_usage: Option<u64>,
    /// Bytes.
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub disk_usage: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub is_payed: Option<bool>,
    /// `YYYY-MM-DD`
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub payed_till: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Player {
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub score: Option<i64>,
    /// Seconds on the server.
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub time: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub kills: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub deaths: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub ping: Option<u64>,
}

impl ServerStatus {
    /// Decodes the union of both remote documents. Keys from `feed` win.
    pub fn from_documents(
        status: Map<String, Value>,
        feed: Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(merge(status, feed)))
    }

    pub fn expires_on(&self) -> Option<NaiveDate> {
        self.payed_till
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    }

    /// Days left until the paid period ends, negative once it has lapsed.
    pub fn days_remaining(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on().map(|d| (d - today).num_days())
    }
}

/// True when the hosting API flagged the document as successful.
pub fn has_success_marker(doc: &Map<String, Value>) -> bool {
    match doc.get("result") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Null) | None => false,
    }
}

fn merge(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn number(value: Option<Value>) -> Option<f64> {
        match value? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(number(Option::<Value>::deserialize(d)?))
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(number(Option::<Value>::deserialize(d)?)
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(number(Option::<Value>::deserialize(d)?)
            .filter(|f| f.is_finite())
            .map(|f| f as i64))
    }

    pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    /// Strings as-is, numbers and bools in their JSON spelling.
    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_string(d)?.unwrap_or_default())
    }

    /// Anything but an array is empty; elements that don't decode are skipped.
    pub fn vec_or_null<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }
}
