//! Label Map Resolution
//!
//! Normalizes a label-mapping document into the canonical `index -> name`
//! table used by the classifier. Two raw encodings are accepted:
//!
//! - index keyed: `{"0": "Apple___Apple_scab", "1": "Apple___healthy"}`
//! - name keyed:  `{"Apple___Apple_scab": 0, "Apple___healthy": 1}`
//!
//! The encoding is detected once at load time and converted immediately;
//! nothing downstream ever sees the raw document.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::utils::error::{DiagnosisError, Result};

/// Label reported when the predicted index has no entry in the label map
pub const UNKNOWN_DISEASE: &str = "Unknown Disease";

/// Minimum number of classes a usable label map must contain
pub const MIN_CLASSES: usize = 2;

/// Raw encoding of a label-mapping document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMapFormat {
    /// Keys are class indices, values are names
    IndexKeyed,
    /// Keys are names, values are class indices
    NameKeyed,
}

impl LabelMapFormat {
    /// Every key parses as an integer -> index keyed, otherwise name keyed.
    pub fn detect(document: &Map<String, Value>) -> Self {
        if document.keys().all(|k| k.trim().parse::<i64>().is_ok()) {
            LabelMapFormat::IndexKeyed
        } else {
            LabelMapFormat::NameKeyed
        }
    }
}

impl std::fmt::Display for LabelMapFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelMapFormat::IndexKeyed => write!(f, "index-keyed"),
            LabelMapFormat::NameKeyed => write!(f, "name-keyed"),
        }
    }
}

/// Canonical class index -> disease name table.
///
/// Indices always form the contiguous range `[0, len)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
    source_format: LabelMapFormat,
}

impl LabelMap {
    /// Resolve a JSON object in either encoding
    pub fn from_document(document: &Map<String, Value>) -> Result<Self> {
        if document.is_empty() {
            return Err(DiagnosisError::Configuration(
                "label map document is empty".to_string(),
            ));
        }

        let format = LabelMapFormat::detect(document);
        let mut table: BTreeMap<usize, String> = BTreeMap::new();

        for (key, value) in document {
            let (index, name) = match format {
                LabelMapFormat::IndexKeyed => (parse_index(key)?, parse_name(key, value)?),
                LabelMapFormat::NameKeyed => (index_from_value(key, value)?, key.clone()),
            };

            if let Some(previous) = table.insert(index, name.clone()) {
                return Err(DiagnosisError::Configuration(format!(
                    "duplicate class index {} ('{}' and '{}')",
                    index, previous, name
                )));
            }
        }

        let names = into_contiguous(table)?;
        if names.len() < MIN_CLASSES {
            return Err(DiagnosisError::Configuration(format!(
                "label map resolves to {} class(es), at least {} required",
                names.len(),
                MIN_CLASSES
            )));
        }

        debug!(classes = names.len(), format = %format, "label map resolved");

        Ok(Self {
            names,
            source_format: format,
        })
    }

    /// Parse and resolve a JSON string; repeated top-level keys are rejected
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: UniqueKeyObject = serde_json::from_str(json).map_err(|e| {
            DiagnosisError::Configuration(format!("label map is not a valid JSON object: {}", e))
        })?;
        Self::from_document(&document.0)
    }

    /// Load and resolve a label-mapping file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DiagnosisError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let map = Self::from_json_str(&json)?;
        info!(
            "Loaded label map from {:?}: {} classes ({})",
            path,
            map.len(),
            map.source_format
        );
        Ok(map)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// A resolved map always holds at least two classes
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for a class index, if present
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Name for a class index, `"Unknown Disease"` when absent
    pub fn name_or_unknown(&self, index: usize) -> &str {
        self.get(index).unwrap_or(UNKNOWN_DISEASE)
    }

    /// Encoding the document was supplied in
    pub fn source_format(&self) -> LabelMapFormat {
        self.source_format
    }

    /// Iterate `(index, name)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }

    /// Canonical index-keyed view
    pub fn to_table(&self) -> BTreeMap<usize, String> {
        self.names.iter().cloned().enumerate().collect()
    }
}

/// Top-level JSON object that fails to parse when a key appears twice.
///
/// `serde_json::Value` keeps only the last of two identical keys, which
/// would silently drop a class.
struct UniqueKeyObject(Map<String, Value>);

impl<'de> Deserialize<'de> for UniqueKeyObject {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ObjectVisitor;

        impl<'de> Visitor<'de> for ObjectVisitor {
            type Value = UniqueKeyObject;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut object = Map::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    if object.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    object.insert(key, value);
                }
                Ok(UniqueKeyObject(object))
            }
        }

        deserializer.deserialize_map(ObjectVisitor)
    }
}

fn parse_index(raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        DiagnosisError::Configuration(format!("'{}' is not a valid class index", raw))
    })
}

fn parse_name(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Ok(name.clone()),
        _ => Err(DiagnosisError::Configuration(format!(
            "class {} must map to a non-empty name, found {}",
            key, value
        ))),
    }
}

fn index_from_value(name: &str, value: &Value) -> Result<usize> {
    let index = match value {
        Value::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    index.ok_or_else(|| {
        DiagnosisError::Configuration(format!(
            "class '{}' has non-integer index {}",
            name, value
        ))
    })
}

fn into_contiguous(table: BTreeMap<usize, String>) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(table.len());
    for (expected, (index, name)) in table.into_iter().enumerate() {
        if index != expected {
            return Err(DiagnosisError::Configuration(format!(
                "class indices must be contiguous from 0, missing index {}",
                expected
            )));
        }
        names.push(name);
    }
    Ok(names)
}

/// Load-once holder for a label map.
///
/// The first caller runs the loader; concurrent first callers block on the
/// same initialization and every later caller gets the cached map. A failed
/// load leaves the cell empty.
#[derive(Debug, Default)]
pub struct LabelMapCache {
    cell: OnceCell<Arc<LabelMap>>,
}

impl LabelMapCache {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the cached map or load it from `path`
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<LabelMap>> {
        self.get_or_try_init(|| LabelMap::load(path))
    }

    /// Return the cached map or build it with `loader`
    pub fn get_or_try_init<F>(&self, loader: F) -> Result<Arc<LabelMap>>
    where
        F: FnOnce() -> Result<LabelMap>,
    {
        self.cell
            .get_or_try_init(|| loader().map(Arc::new))
            .cloned()
    }

    /// The cached map, if already loaded
    pub fn get(&self) -> Option<Arc<LabelMap>> {
        self.cell.get().cloned()
    }
}

static PROCESS_LABEL_MAP: LabelMapCache = LabelMapCache::new();

/// Process-wide label map. Only the first successful call reads `path`.
pub fn process_label_map(path: &Path) -> Result<Arc<LabelMap>> {
    PROCESS_LABEL_MAP.get_or_load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_both_encodings_resolve_to_same_table() {
        let by_name = LabelMap::from_json_str(r#"{"A": 0, "B": 1}"#).unwrap();
        let by_index = LabelMap::from_json_str(r#"{"0": "A", "1": "B"}"#).unwrap();

        assert_eq!(by_name.to_table(), by_index.to_table());
        assert_eq!(by_name.get(0), Some("A"));
        assert_eq!(by_name.get(1), Some("B"));
        assert_eq!(by_name.source_format(), LabelMapFormat::NameKeyed);
        assert_eq!(by_index.source_format(), LabelMapFormat::IndexKeyed);

        let pairs: Vec<(usize, &str)> = by_name.iter().collect();
        assert_eq!(pairs, vec![(0, "A"), (1, "B")]);
    }

    #[test]
    fn test_name_keyed_accepts_string_indices() {
        let map = LabelMap::from_json_str(r#"{"Tomato___healthy": "1", "Tomato___Late_blight": "0"}"#)
            .unwrap();
        assert_eq!(map.get(0), Some("Tomato___Late_blight"));
        assert_eq!(map.get(1), Some("Tomato___healthy"));
    }

    #[test]
    fn test_index_order_not_key_order() {
        // String-sorted keys put "10" before "2"
        let json = (0..12)
            .map(|i| format!("\"{}\": \"class_{}\"", i, i))
            .collect::<Vec<_>>()
            .join(",");
        let map = LabelMap::from_json_str(&format!("{{{}}}", json)).unwrap();
        assert_eq!(map.len(), 12);
        assert_eq!(map.get(2), Some("class_2"));
        assert_eq!(map.get(10), Some("class_10"));
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let err = LabelMap::from_json_str("{}").unwrap_err();
        assert!(matches!(err, DiagnosisError::Configuration(_)));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(LabelMap::from_json_str(r#"["A", "B"]"#).is_err());
        assert!(LabelMap::from_json_str("not json").is_err());
    }

    #[test]
    fn test_single_class_is_rejected() {
        let err = LabelMap::from_json_str(r#"{"0": "A"}"#).unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn test_non_integer_index_after_inversion() {
        let err = LabelMap::from_json_str(r#"{"A": 0, "B": "one"}"#).unwrap_err();
        assert!(err.to_string().contains("non-integer index"));

        assert!(LabelMap::from_json_str(r#"{"A": 0, "B": 1.5}"#).is_err());
        assert!(LabelMap::from_json_str(r#"{"A": 0, "B": -1}"#).is_err());
    }

    #[test]
    fn test_duplicate_index_is_rejected() {
        let err = LabelMap::from_json_str(r#"{"A": 0, "B": 0, "C": 1}"#).unwrap_err();
        assert!(err.to_string().contains("duplicate class index 0"));

        // "0" and "00" are distinct JSON keys naming the same index
        assert!(LabelMap::from_json_str(r#"{"0": "A", "00": "B", "1": "C"}"#).is_err());

        // a repeated key must not silently overwrite the earlier class
        let err = LabelMap::from_json_str(r#"{"0": "A", "0": "B", "1": "C"}"#).unwrap_err();
        assert!(matches!(err, DiagnosisError::Configuration(_)));
        assert!(err.to_string().contains("duplicate key '0'"));

        let err = LabelMap::from_json_str(r#"{"A": 0, "B": 1, "A": 2}"#).unwrap_err();
        assert!(err.to_string().contains("duplicate key 'A'"));
    }

    #[test]
    fn test_nested_values_parse_normally() {
        // only top-level keys are checked; values keep regular JSON semantics
        let err = LabelMap::from_json_str(r#"{"0": {"x": 1, "x": 2}, "1": "B"}"#).unwrap_err();
        assert!(err.to_string().contains("non-empty name"));
    }

    #[test]
    fn test_gap_in_indices_is_rejected() {
        let err = LabelMap::from_json_str(r#"{"0": "A", "2": "C"}"#).unwrap_err();
        assert!(err.to_string().contains("missing index 1"));
    }

    #[test]
    fn test_negative_index_key_is_rejected() {
        assert!(LabelMap::from_json_str(r#"{"-1": "A", "0": "B"}"#).is_err());
    }

    #[test]
    fn test_duplicate_names_are_allowed() {
        let map = LabelMap::from_json_str(r#"{"0": "Same", "1": "Same"}"#).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_unknown_index_fallback() {
        let map = LabelMap::from_json_str(r#"{"0": "A", "1": "B"}"#).unwrap();
        assert_eq!(map.name_or_unknown(1), "B");
        assert_eq!(map.name_or_unknown(7), UNKNOWN_DISEASE);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_indices.json");
        std::fs::write(&path, r#"{"Apple___Apple_scab": 0, "Apple___healthy": 1}"#).unwrap();

        let map = LabelMap::load(&path).unwrap();
        assert_eq!(map.get(0), Some("Apple___Apple_scab"));

        let missing = LabelMap::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, DiagnosisError::PathNotFound(_)));
    }

    #[test]
    fn test_cache_initializes_once_under_concurrency() {
        let cache = Arc::new(LabelMapCache::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                thread::spawn(move || {
                    cache
                        .get_or_try_init(|| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            LabelMap::from_json_str(r#"{"0": "A", "1": "B"}"#)
                        })
                        .unwrap()
                })
            })
            .collect();

        let maps: Vec<Arc<LabelMap>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(maps.iter().all(|m| Arc::ptr_eq(m, &maps[0])));
    }

    #[test]
    fn test_cache_retries_after_failed_load() {
        let cache = LabelMapCache::new();
        assert!(cache.get_or_try_init(|| LabelMap::from_json_str("{}")).is_err());
        assert!(cache.get().is_none());

        let map = cache
            .get_or_try_init(|| LabelMap::from_json_str(r#"{"0": "A", "1": "B"}"#))
            .unwrap();
        assert_eq!(map.len(), 2);
    }
}
