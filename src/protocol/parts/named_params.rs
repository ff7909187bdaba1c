use crate::{protocol::parts::DbValue, FbError, FbResult};

/// A derived value together with the source revision it was computed from.
///
/// Owners of mutable collections expose a monotonically increasing revision
/// counter; consumers cache derived state in a `Revisioned` and compare
/// before reuse. A stale revision means "rebuild required".
#[derive(Clone, Debug)]
pub struct Revisioned<T> {
    value: T,
    revision: u64,
}

impl<T> Revisioned<T> {
    pub fn new(value: T, revision: u64) -> Self {
        Self { value, revision }
    }

    pub fn is_current(&self, revision: u64) -> bool {
        self.revision == revision
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

#[derive(Clone, Debug)]
struct ParamEntry {
    name: String,
    value: DbValue,
}

/// An ordered collection of named parameter values.
///
/// Structural changes (add, remove, rename) bump the revision counter;
/// value updates do not. Derived state like the name-to-ordinal mapping is
/// cached keyed on that counter.
#[derive(Clone, Debug, Default)]
pub struct ParamCollection {
    entries: Vec<ParamEntry>,
    revision: u64,
}

impl ParamCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The structural version; bumped on every name or membership change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push<S: AsRef<str>>(&mut self, name: S, value: DbValue) {
        self.entries.push(ParamEntry {
            name: name.as_ref().to_string(),
            value,
        });
        self.revision += 1;
    }

    /// Removes the first parameter with the given name.
    pub fn remove(&mut self, name: &str) -> Option<DbValue> {
        let index = self.position_of(name)?;
        let entry = self.entries.remove(index);
        self.revision += 1;
        Some(entry.value)
    }

    /// Renames a parameter; a rename invalidates every cached mapping.
    pub fn rename(&mut self, name: &str, new_name: &str) -> FbResult<()> {
        let index = self
            .position_of(name)
            .ok_or_else(|| FbError::ParameterBinding(name.to_string()))?;
        self.entries[index].name = new_name.to_string();
        self.revision += 1;
        Ok(())
    }

    /// Updates the value of an existing parameter without touching the
    /// structural version.
    pub fn set_value(&mut self, name: &str, value: DbValue) -> FbResult<()> {
        let index = self
            .position_of(name)
            .ok_or_else(|| FbError::ParameterBinding(name.to_string()))?;
        self.entries[index].value = value;
        Ok(())
    }

    pub fn value_at(&self, index: usize) -> &DbValue {
        &self.entries[index].value
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| names_match(&entry.name, name))
    }
}

// Parameter names compare without a single leading sigil and without regard
// to ASCII case.
fn names_match(a: &str, b: &str) -> bool {
    strip_sigil(a).eq_ignore_ascii_case(strip_sigil(b))
}

fn strip_sigil(name: &str) -> &str {
    name.strip_prefix('@')
        .or_else(|| name.strip_prefix(':'))
        .unwrap_or(name)
}

/// Maps the names declared by a statement, in declaration order, to ordinal
/// positions in a [`ParamCollection`].
///
/// The mapping is rebuilt exactly when the collection's revision has moved
/// since it was last computed. Duplicate declared names resolve to the same
/// ordinal and are filled with the same source value every occurrence.
#[derive(Debug, Default)]
pub struct NamedParameterMap {
    mapping: Option<Revisioned<Vec<usize>>>,
}

impl NamedParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces the values for `declared`, in declaration order.
    ///
    /// A declared name with no bound parameter fails with
    /// [`FbError::ParameterBinding`] carrying that name.
    pub fn fill(
        &mut self,
        declared: &[String],
        params: &ParamCollection,
    ) -> FbResult<Vec<DbValue>> {
        let revision = params.revision();
        let stale = match self.mapping {
            Some(ref mapping) => !mapping.is_current(revision),
            None => true,
        };
        if stale {
            trace!("rebuilding named-parameter mapping for revision {revision}");
            self.mapping = Some(Revisioned::new(build_mapping(declared, params)?, revision));
        }

        let mapping = self.mapping.as_ref().expect("mapping was just built");
        Ok(mapping
            .value()
            .iter()
            .map(|&ordinal| params.value_at(ordinal).clone())
            .collect())
    }
}

fn build_mapping(declared: &[String], params: &ParamCollection) -> FbResult<Vec<usize>> {
    declared
        .iter()
        .map(|name| {
            params
                .position_of(name)
                .ok_or_else(|| FbError::ParameterBinding(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn declared(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_fill_follows_declaration_order() {
        let mut params = ParamCollection::new();
        params.push("@b", DbValue::INT(22));
        params.push("@a", DbValue::INT(11));

        let mut map = NamedParameterMap::new();
        let values = map.fill(&declared(&["@a", "@b"]), &params).unwrap();
        assert_eq!(values, vec![DbValue::INT(11), DbValue::INT(22)]);
    }

    #[test]
    fn test_duplicate_names_fill_every_occurrence() {
        let mut params = ParamCollection::new();
        params.push("@p", DbValue::INT(123));

        let mut map = NamedParameterMap::new();
        let values = map.fill(&declared(&["@p", "@p"]), &params).unwrap();
        assert_eq!(values, vec![DbValue::INT(123), DbValue::INT(123)]);
    }

    #[test]
    fn test_rename_invalidates_mapping() {
        let mut params = ParamCollection::new();
        params.push("@a", DbValue::INT(1));
        params.push("@b", DbValue::INT(2));

        let names = declared(&["@a", "@b"]);
        let mut map = NamedParameterMap::new();
        map.fill(&names, &params).unwrap();

        params.rename("@b", "@c").unwrap();
        match map.fill(&names, &params) {
            Err(FbError::ParameterBinding(name)) => assert_eq!(name, "@b"),
            other => panic!("expected ParameterBinding error, got {other:?}"),
        }
    }

    #[test]
    fn test_value_update_keeps_mapping() {
        let mut params = ParamCollection::new();
        params.push("@a", DbValue::INT(1));

        let names = declared(&["@a"]);
        let mut map = NamedParameterMap::new();
        map.fill(&names, &params).unwrap();
        let revision = params.revision();

        params.set_value("@a", DbValue::INT(5)).unwrap();
        assert_eq!(params.revision(), revision);
        let values = map.fill(&names, &params).unwrap();
        assert_eq!(values, vec![DbValue::INT(5)]);
    }

    #[test]
    fn test_sigil_and_case_insensitive_lookup() {
        let mut params = ParamCollection::new();
        params.push(":Par", DbValue::INT(9));

        let mut map = NamedParameterMap::new();
        let values = map.fill(&declared(&["@PAR"]), &params).unwrap();
        assert_eq!(values, vec![DbValue::INT(9)]);
    }
}
