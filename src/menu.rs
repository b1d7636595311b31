//! Menu item records and parsing of the model's free-text reply.
//!
//! Models are told to return only a JSON array, but they regularly wrap it in
//! prose ("Sure! Here are the items: [...] Let me know…") or in a code fence.
//! [`parse_menu_reply`] therefore parses only the span from the first `[` to
//! the last `]`.

use crate::config::PricePairing;
use crate::error::ExtractionError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;

/// One entry of an item's `prices`.
///
/// Models are asked for numbers but sometimes write `"45"`, `"MP"` or `null`
/// for a market price. None of these invalidate the reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Price {
    /// A number, or a string that reads as one.
    Amount(Number),
    /// Any other non-null value, kept as written.
    Text(String),
    /// `null`.
    Missing,
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Amount(n) => write!(f, "{n}"),
            Price::Text(t) => f.write_str(t),
            Price::Missing => Ok(()),
        }
    }
}

impl From<Number> for Price {
    fn from(n: Number) -> Self {
        Price::Amount(n)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Price::Amount(n) => n.serialize(serializer),
            Price::Text(t) => serializer.serialize_str(t),
            Price::Missing => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null => Price::Missing,
            Value::Number(n) => Price::Amount(n),
            Value::String(s) => match parse_number(s.trim()) {
                Some(n) => Price::Amount(n),
                None => Price::Text(s),
            },
            other => Price::Text(other.to_string()),
        })
    }
}

/// One dish as returned by the extraction step.
///
/// Fields the schema does not name are kept in `extra` so the JSON export
/// returns exactly what the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub prices: Vec<Price>,

    #[serde(default, rename = "priceLabels", deserialize_with = "lenient_strings")]
    pub price_labels: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    #[serde(default, deserialize_with = "lenient_strings")]
    pub labels: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MenuItem {
    /// Convenience constructor used by tests and callers building items by hand.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prices: Vec::new(),
            price_labels: Vec::new(),
            description: String::new(),
            labels: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Append a (price, label) pair.
    pub fn with_price(mut self, price: impl Into<Number>, label: impl Into<String>) -> Self {
        self.prices.push(Price::Amount(price.into()));
        self.price_labels.push(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// `prices` and `priceLabels` have the same length.
    pub fn is_well_paired(&self) -> bool {
        self.prices.len() == self.price_labels.len()
    }

    /// Walk prices and labels together up to the shorter length.
    pub fn price_pairs(&self) -> impl Iterator<Item = (&Price, &str)> {
        self.prices
            .iter()
            .zip(self.price_labels.iter().map(String::as_str))
    }
}

/// Return the span from the first `[` to the last `]`, if both exist in that order.
pub fn locate_json_array(reply: &str) -> Option<&str> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse a model reply into menu items.
///
/// A reply without a `[`…`]` span yields an empty list: the model found no
/// items. A span that is not a JSON array of objects is a
/// [`ExtractionError::ParseFailed`]; odd values inside a record (a `null`
/// name, a `null` or textual price) are tolerated. Under [`PricePairing::Strict`] an item
/// whose prices and labels differ in length rejects the whole reply.
pub fn parse_menu_reply(
    reply: &str,
    image: usize,
    pairing: PricePairing,
) -> Result<Vec<MenuItem>, ExtractionError> {
    let Some(json) = locate_json_array(reply) else {
        return Ok(Vec::new());
    };

    let items: Vec<MenuItem> =
        serde_json::from_str(json).map_err(|e| ExtractionError::ParseFailed {
            image,
            detail: e.to_string(),
        })?;

    if pairing == PricePairing::Strict {
        if let Some(bad) = items.iter().find(|item| !item.is_well_paired()) {
            return Err(ExtractionError::MalformedRecord {
                image,
                item: bad.name.clone(),
                prices: bad.prices.len(),
                labels: bad.price_labels.len(),
            });
        }
    }

    Ok(items)
}

// ── Lenient field decoding ───────────────────────────────────────────────

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A list of strings where `null` entries become empty strings.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}
