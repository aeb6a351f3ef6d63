use std::collections::BTreeMap;

/// Storage for one attribute across all entries of a listing.
///
/// `Common` holds a single value shared by every entry, `Dense` holds one
/// value per entry and `Sparse` holds values for some entries only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column<T> {
    Common(T),
    Dense(Vec<T>),
    Sparse(BTreeMap<usize, T>),
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self::Sparse(BTreeMap::new())
    }
}

impl<T> Column<T> {
    pub fn common(value: T) -> Self {
        Self::Common(value)
    }

    pub fn dense() -> Self {
        Self::Dense(Vec::new())
    }

    pub fn sparse() -> Self {
        Self::Sparse(BTreeMap::new())
    }

    pub fn is_common(&self) -> bool {
        matches!(self, Self::Common(_))
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// Number of stored values, a common column stores exactly one
    pub fn len(&self) -> usize {
        match self {
            Self::Common(_) => 1,
            Self::Dense(values) => values.len(),
            Self::Sparse(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, index: usize) -> bool {
        match self {
            Self::Common(_) => true,
            Self::Dense(values) => index < values.len(),
            Self::Sparse(values) => values.contains_key(&index),
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        match self {
            Self::Common(value) => Some(value),
            Self::Dense(values) => values.get(index),
            Self::Sparse(values) => values.get(&index),
        }
    }

    /// Stores `value` for entry `index`.
    ///
    /// A common column simply takes the new value. A dense column only grows
    /// at its end.
    ///
    /// # Panics
    /// When inserting into a dense column past its end.
    pub fn insert(&mut self, index: usize, value: T) {
        match self {
            Self::Common(common) => *common = value,
            Self::Dense(values) => {
                if index < values.len() {
                    values[index] = value;
                } else {
                    assert_eq!(index, values.len(), "dense column must be filled in order");
                    values.push(value);
                }
            }
            Self::Sparse(values) => {
                let _ = values.insert(index, value);
            }
        }
    }

    /// `true` if a sparse column holds values for exactly `0..len()`
    pub fn is_contiguous(&self) -> bool {
        match self {
            Self::Sparse(values) => values.keys().enumerate().all(|(i, k)| i == *k),
            _ => false,
        }
    }

    /// Converts a contiguous sparse column into dense storage, otherwise a no-op
    pub fn compress_contiguous(&mut self) {
        if !self.is_contiguous() {
            return;
        }

        if let Self::Sparse(values) = std::mem::take(self) {
            *self = Self::Dense(values.into_values().collect());
        }
    }
}

impl<T> From<Vec<T>> for Column<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Dense(values)
    }
}

#[cfg(test)]
mod test_column {
    use super::*;

    #[test]
    fn test_common() {
        let column = Column::common(7u64);
        assert!(column.has(0));
        assert!(column.has(1000));
        assert_eq!(column.get(42), Some(&7));
        assert_eq!(column.len(), 1);
    }

    #[test]
    fn test_dense() {
        let mut column = Column::dense();
        column.insert(0, "a");
        column.insert(1, "b");
        column.insert(0, "c");
        assert_eq!(column.get(0), Some(&"c"));
        assert_eq!(column.get(1), Some(&"b"));
        assert!(!column.has(2));
    }

    #[test]
    #[should_panic(expected = "dense column must be filled in order")]
    fn test_dense_gap_panics() {
        let mut column = Column::dense();
        column.insert(1, 1u32);
    }

    #[test]
    fn test_sparse_compression() {
        let mut column = Column::sparse();
        column.insert(2, 20u32);
        column.insert(0, 0);
        assert!(!column.is_contiguous());
        column.compress_contiguous();
        assert!(column.is_sparse());

        column.insert(1, 10);
        assert!(column.is_contiguous());
        column.compress_contiguous();
        assert_eq!(column, Column::Dense(vec![0, 10, 20]));
    }

    #[test]
    fn test_empty_sparse_is_contiguous() {
        let mut column = Column::<u32>::default();
        assert!(column.is_contiguous());
        column.compress_contiguous();
        assert!(column.is_dense());
        assert!(!column.has(0));
    }
}
