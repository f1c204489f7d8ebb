use convfuse_core::Tensor;

/// Ordered mapping from parameter names to tensors.
///
/// Names follow `<prefix>.<layer index>.<parameter>`; insertion order is
/// kept so that saved files list parameters in network order.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDict<T> {
    entries: Vec<(String, Tensor<T>)>,
}

impl<T> StateDict<T> {
    /// Create an empty state dict.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace an entry, returning the tensor it replaced.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor<T>) -> Option<Tensor<T>> {
        let name = name.into();
        match self.entries.iter().position(|(n, _)| *n == name) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, tensor)),
            None => {
                self.entries.push((name, tensor));
                None
            }
        }
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&Tensor<T>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor<T>> {
        let position = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(position).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor<T>)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Append every entry of `other`, replacing entries with the same name.
    pub fn merge(&mut self, other: StateDict<T>) {
        for (name, tensor) in other {
            self.insert(name, tensor);
        }
    }

    /// Total number of scalar values.
    pub fn num_elements(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.size()).sum()
    }
}

impl<T> Default for StateDict<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for StateDict<T> {
    type Item = (String, Tensor<T>);
    type IntoIter = std::vec::IntoIter<(String, Tensor<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<T> FromIterator<(String, Tensor<T>)> for StateDict<T> {
    fn from_iter<I: IntoIterator<Item = (String, Tensor<T>)>>(iter: I) -> Self {
        let mut dict = Self::new();
        for (name, tensor) in iter {
            dict.insert(name, tensor);
        }
        dict
    }
}
