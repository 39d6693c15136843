//! Project descriptor model shared by every stage.
//!
//! A project archive carries one `projectDescriptor.json`:
//!
//! ```text
//! {
//!   "descriptor": { "id": "...", "name": "...", ... },
//!   "productId": ..., "options": ..., "compositionMetaInfo": ...,
//!   "pages": [
//!     { "id": "...", "layers": [ { "elements": [ { "id", "type", ... } ] } ] },
//!     {},                      // empty slot
//!     ...
//!   ]
//! }
//! ```
//!
//! Only the fields the merge touches are typed. Everything else is kept in a
//! flattened `extra` map on each object so that descriptors survive a load →
//! copy → write cycle without losing data the merger does not understand.
//!
//! Fields whose *presence* matters (a `picture` key holding `null` is not the
//! same as no key at all) are modelled as `Option<Option<T>>`: the outer
//! option is "key present", the inner one is "value non-null".

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Element `type` of picture boxes.
pub const PICTURE: &str = "PICTURE";
/// Element `type` of text boxes.
pub const TEXT: &str = "TEXT";

const BOM: &str = "\u{feff}";

/// A whole project descriptor, either a loaded source or the merged output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub descriptor: Descriptor,
    pub product_id: Value,
    pub options: Value,
    pub composition_meta_info: Value,
    pub pages: Vec<PageSlot>,
}

/// Project header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the `pages` array: a real page or an empty `{}` placeholder.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PageSlot {
    #[default]
    Empty,
    Filled(Page),
}

impl PageSlot {
    pub fn page(&self) -> Option<&Page> {
        match self {
            PageSlot::Empty => None,
            PageSlot::Filled(page) => Some(page),
        }
    }

    pub fn page_mut(&mut self) -> Option<&mut Page> {
        match self {
            PageSlot::Empty => None,
            PageSlot::Filled(page) => Some(page),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PageSlot::Empty)
    }
}

impl Serialize for PageSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageSlot::Empty => Map::new().serialize(serializer),
            PageSlot::Filled(page) => page.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PageSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Map<String, Value>>::deserialize(deserializer)? {
            None => Ok(PageSlot::Empty),
            Some(map) if map.is_empty() => Ok(PageSlot::Empty),
            Some(map) => Page::deserialize(Value::Object(map))
                .map(PageSlot::Filled)
                .map_err(D::Error::custom),
        }
    }
}

/// A page with its layers. `source_project` is the provenance tag set by the
/// planner; it names the project key whose image store holds the pictures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_project: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Page {
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.layers.iter().flat_map(|layer| layer.elements.iter())
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.elements.iter_mut())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A design element (picture box, text box, shape, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub picture: Option<Option<Picture>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub permissions: Option<Option<Permissions>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Element {
    pub fn is_picture(&self) -> bool {
        self.kind == PICTURE
    }

    pub fn is_text(&self) -> bool {
        self.kind == TEXT
    }

    /// The picture payload, if the key is present and non-null.
    pub fn picture(&self) -> Option<&Picture> {
        self.picture.as_ref().and_then(Option::as_ref)
    }
}

/// A picture reference inside a PICTURE element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Picture {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub exif_date: Option<Option<Timestamp>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<Option<Timestamp>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Picture {
    /// `exifDate` when present and non-null, otherwise `lastModified`.
    pub fn effective_timestamp(&self) -> Option<&Timestamp> {
        self.exif_date
            .as_ref()
            .and_then(Option::as_ref)
            .or_else(|| self.last_modified.as_ref().and_then(Option::as_ref))
    }
}

/// Milliseconds since the Unix epoch, kept as the JSON number it was read
/// from. The editor writes integers, but floats are accepted and written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(serde_json::Number);

impl Timestamp {
    /// Whole milliseconds, truncating a fractional value. `None` for a
    /// non-finite float.
    pub fn millis(&self) -> Option<i64> {
        self.0.as_i64().or_else(|| {
            self.0
                .as_f64()
                .filter(|ms| ms.is_finite())
                .map(|ms| ms as i64)
        })
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Timestamp(millis.into())
    }
}

/// Editing permissions of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub explicit_permissions: Option<Option<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deserialize a key that was present in the input, keeping `null` distinct
/// from absence (absence is handled by `#[serde(default)]`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ProjectDocument {
    /// Every element of every filled page, in page → layer → element order,
    /// paired with its page slot index.
    pub fn elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.pages.iter().enumerate().flat_map(|(index, slot)| {
            slot.page()
                .into_iter()
                .flat_map(move |page| page.elements().map(move |element| (index, element)))
        })
    }

    /// Every non-null picture, in walk order.
    pub fn pictures(&self) -> impl Iterator<Item = &Picture> {
        self.elements()
            .filter(|(_, element)| element.is_picture())
            .filter_map(|(_, element)| element.picture())
    }
}

// ============================================================================
// Document encoding
// ============================================================================

/// Parse a JSON document that may start with a UTF-8 byte-order mark.
pub fn parse_document<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> serde_json::Result<T> {
    let bytes = bytes.strip_prefix(BOM.as_bytes()).unwrap_or(bytes);
    serde_json::from_slice(bytes)
}

/// Serialize a document as compact JSON with a leading byte-order mark.
pub fn encode_document<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = BOM.as_bytes().to_vec();
    serde_json::to_writer(&mut out, value)?;
    Ok(out)
}

/// Serialize a document as 4-space indented JSON with a leading byte-order mark.
pub fn encode_document_pretty<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = BOM.as_bytes().to_vec();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Encode a plain text entry with a leading byte-order mark.
pub fn encode_text(text: &str) -> Vec<u8> {
    format!("{BOM}{text}").into_bytes()
}
