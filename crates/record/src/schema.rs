use std::collections::HashMap;
use std::sync::Arc;

/// Map a column name into its normalized form: lower-cased, with every
/// non-alphanumeric character replaced by '_', and prefixed with '_' if it
/// would otherwise begin with a digit. Normalization is total, deterministic,
/// and idempotent, and is the one implementation used by cursors, lookups,
/// and DML generation alike.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Schema is the ordered column descriptor shared by every Record of one
/// query or file pass: original names, normalized names, and an index for
/// each. Rows hold an `Arc<Schema>` and a flat values array, keeping the
/// per-row footprint to values only.
#[derive(Debug, PartialEq)]
pub struct Schema {
    names: Vec<String>,
    normalized: Vec<String>,
    by_name: HashMap<String, usize>,
    by_normalized: HashMap<String, usize>,
}

impl Schema {
    pub fn new<I, S>(names: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();

        let mut normalized = Vec::with_capacity(names.len());
        let mut by_normalized = HashMap::with_capacity(names.len());

        for (index, name) in names.iter().enumerate() {
            let base = normalize(name);

            // Suffix duplicate normalized names _2, _3, ... until unique
            // within this schema.
            let mut candidate = base.clone();
            let mut ordinal = 1;
            while by_normalized.contains_key(&candidate) {
                ordinal += 1;
                candidate = format!("{base}_{ordinal}");
            }

            by_normalized.insert(candidate.clone(), index);
            normalized.push(candidate);
        }

        // First occurrence wins for duplicated original names.
        let mut by_name = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            by_name.entry(name.clone()).or_insert(index);
        }

        Arc::new(Self {
            names,
            normalized,
            by_name,
            by_normalized,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn normalized(&self) -> &[String] {
        &self.normalized
    }

    /// Resolve a key to its column index, preferring an exact original-name
    /// match and falling back to the normalized form.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        if let Some(&index) = self.by_name.get(key) {
            return Some(index);
        }
        self.by_normalized.get(&normalize(key)).copied()
    }

    /// Derive a new Schema with `name` appended, preserving all current
    /// columns. Used when a mutated Record gains a column and detaches from
    /// its shared schema.
    pub(crate) fn with_appended(&self, name: &str) -> Arc<Self> {
        let names = self
            .names
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(name));
        Self::new(names)
    }

    /// Derive a new Schema with the column at `index` removed.
    pub(crate) fn without(&self, index: usize) -> Arc<Self> {
        let names = self
            .names
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, n)| n.as_str());
        Self::new(names)
    }
}
