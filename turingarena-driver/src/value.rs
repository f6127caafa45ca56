use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A datum exchanged with the driver: a scalar or an array of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(i64),
    Array(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("too few lines")]
    TooFewLines,
    #[error("invalid dimension count {0}")]
    InvalidDimensions(i64),
    #[error("invalid array length {0}")]
    InvalidLength(i64),
    #[error("array item has {found} dimension(s), expected {expected}")]
    InconsistentItem { expected: usize, found: usize },
}

impl Value {
    /// The number of dimensions of the value, the deepest of its items. An empty array counts as
    /// one-dimensional.
    pub fn dimensions(&self) -> usize {
        match self {
            Value::Scalar(_) => 0,
            Value::Array(items) => 1 + items.iter().map(|i| i.dimensions()).max().unwrap_or(0),
        }
    }

    /// Whether the value can be stored in a reference with `dimensions` dimensions. Empty arrays
    /// fit any number of dimensions but zero.
    pub fn has_dimensions(&self, dimensions: usize) -> bool {
        match self {
            Value::Scalar(_) => dimensions == 0,
            Value::Array(items) => {
                dimensions > 0 && items.iter().all(|i| i.has_dimensions(dimensions - 1))
            }
        }
    }

    pub fn as_scalar(&self) -> Option<i64> {
        match self {
            Value::Scalar(value) => Some(*value),
            Value::Array(_) => None,
        }
    }

    /// Encode the value as a sequence of integer lines: the number of dimensions, then the scalar
    /// or the length of the array followed by every item encoded the same way.
    pub fn serialize(&self) -> Vec<i64> {
        let mut lines = vec![];
        self.serialize_into(self.dimensions(), &mut lines);
        lines
    }

    /// The items are encoded with the dimensions of the enclosing array, so that empty arrays
    /// deep in the value keep the dimension count of their siblings.
    fn serialize_into(&self, dimensions: usize, lines: &mut Vec<i64>) {
        lines.push(dimensions as i64);
        match self {
            Value::Scalar(value) => lines.push(*value),
            Value::Array(items) => {
                lines.push(items.len() as i64);
                for item in items {
                    item.serialize_into(dimensions.saturating_sub(1), lines);
                }
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// The outcome of feeding one line to a [`ValueDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    NeedMore,
    Done(Value),
}

/// The most items preallocated for an array, whatever length is announced.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Dimensions,
    Scalar,
    Length(usize),
}

#[derive(Debug)]
struct PartialArray {
    item_dimensions: usize,
    remaining: usize,
    items: Vec<Value>,
}

/// Incremental decoder of the encoding produced by [`Value::serialize`].
#[derive(Debug)]
pub struct ValueDecoder {
    expect: Expect,
    stack: Vec<PartialArray>,
}

impl Default for ValueDecoder {
    fn default() -> Self {
        ValueDecoder {
            expect: Expect::Dimensions,
            stack: vec![],
        }
    }
}

impl ValueDecoder {
    pub fn new() -> ValueDecoder {
        ValueDecoder::default()
    }

    /// Feed the next line of the encoding.
    pub fn feed(&mut self, line: i64) -> Result<Decoded, DecodeError> {
        match self.expect {
            Expect::Dimensions => {
                if line < 0 {
                    return Err(DecodeError::InvalidDimensions(line));
                }
                if let Some(array) = self.stack.last() {
                    if line as usize != array.item_dimensions {
                        return Err(DecodeError::InconsistentItem {
                            expected: array.item_dimensions,
                            found: line as usize,
                        });
                    }
                }
                self.expect = match line {
                    0 => Expect::Scalar,
                    dimensions => Expect::Length(dimensions as usize),
                };
                Ok(Decoded::NeedMore)
            }
            Expect::Scalar => self.complete(Value::Scalar(line)),
            Expect::Length(dimensions) => {
                if line < 0 {
                    return Err(DecodeError::InvalidLength(line));
                }
                if line == 0 {
                    return self.complete(Value::Array(vec![]));
                }
                let length = usize::try_from(line).map_err(|_| DecodeError::InvalidLength(line))?;
                self.stack.push(PartialArray {
                    item_dimensions: dimensions - 1,
                    remaining: length,
                    items: Vec::with_capacity(length.min(MAX_PREALLOCATED_ITEMS)),
                });
                self.expect = Expect::Dimensions;
                Ok(Decoded::NeedMore)
            }
        }
    }

    fn complete(&mut self, mut value: Value) -> Result<Decoded, DecodeError> {
        self.expect = Expect::Dimensions;
        loop {
            let Some(array) = self.stack.last_mut() else {
                return Ok(Decoded::Done(value));
            };
            array.items.push(value);
            array.remaining -= 1;
            if array.remaining > 0 {
                return Ok(Decoded::NeedMore);
            }
            let array = match self.stack.pop() {
                Some(array) => array,
                None => unreachable!("the stack was just inspected"),
            };
            value = Value::Array(array.items);
        }
    }

    /// Decode a whole value from an iterator of lines.
    pub fn decode<I: IntoIterator<Item = i64>>(lines: I) -> Result<Value, DecodeError> {
        let mut decoder = ValueDecoder::new();
        for line in lines {
            if let Decoded::Done(value) = decoder.feed(line)? {
                return Ok(value);
            }
        }
        Err(DecodeError::TooFewLines)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_serialize_scalar() {
        assert_eq!(Value::Scalar(42).serialize(), vec![0, 42]);
    }

    #[test]
    fn test_serialize_matrix() {
        let value = Value::from(vec![vec![1, 2], vec![3]]);
        assert_eq!(value.dimensions(), 2);
        assert_eq!(
            value.serialize(),
            vec![2, 2, 1, 2, 0, 1, 0, 2, 1, 1, 0, 3]
        );
    }

    #[test]
    fn test_decode_matrix() {
        let value = Value::from(vec![vec![1, 2], vec![3]]);
        assert_eq!(ValueDecoder::decode(value.serialize()), Ok(value));
    }

    #[test]
    fn test_decode_empty_array() {
        let value = ValueDecoder::decode(vec![1, 0]).unwrap();
        assert_eq!(value, Value::Array(vec![]));
        assert!(value.has_dimensions(1));
        assert!(value.has_dimensions(3));
        assert!(!value.has_dimensions(0));
    }

    #[test]
    fn test_decode_too_few_lines() {
        let mut lines = Value::from(vec![5, 6, 7]).serialize();
        lines.pop();
        assert_eq!(ValueDecoder::decode(lines), Err(DecodeError::TooFewLines));
    }

    #[test]
    fn test_feed_incrementally() {
        let mut decoder = ValueDecoder::new();
        assert_eq!(decoder.feed(1), Ok(Decoded::NeedMore));
        assert_eq!(decoder.feed(1), Ok(Decoded::NeedMore));
        assert_eq!(decoder.feed(0), Ok(Decoded::NeedMore));
        assert_eq!(decoder.feed(-4), Ok(Decoded::Done(Value::from(vec![-4]))));
    }

    #[test]
    fn test_decode_inconsistent() {
        assert_eq!(
            ValueDecoder::decode(vec![1, 1, 1, 1, 0, 5]),
            Err(DecodeError::InconsistentItem {
                expected: 0,
                found: 1
            })
        );
        assert_eq!(
            ValueDecoder::decode(vec![-1]),
            Err(DecodeError::InvalidDimensions(-1))
        );
    }

    #[test]
    fn test_empty_items_keep_dimensions() {
        let deep_first = Value::Array(vec![
            Value::from(vec![vec![1i64]]),
            Value::Array(vec![]),
        ]);
        assert_eq!(deep_first.dimensions(), 3);
        assert_eq!(
            deep_first.serialize(),
            vec![3, 2, 2, 1, 1, 1, 0, 1, 2, 0]
        );
        assert_eq!(ValueDecoder::decode(deep_first.serialize()), Ok(deep_first));

        let empty_first = Value::Array(vec![
            Value::Array(vec![]),
            Value::from(vec![vec![1i64]]),
        ]);
        assert_eq!(empty_first.dimensions(), 3);
        assert!(empty_first.has_dimensions(3));
        assert!(!empty_first.has_dimensions(2));
        assert_eq!(ValueDecoder::decode(empty_first.serialize()), Ok(empty_first));
    }

    #[test]
    fn test_huge_announced_length() {
        let mut decoder = ValueDecoder::new();
        assert_eq!(decoder.feed(1), Ok(Decoded::NeedMore));
        assert_eq!(decoder.feed(1_000_000_000_000_000_000), Ok(Decoded::NeedMore));
        assert_eq!(decoder.feed(0), Ok(Decoded::NeedMore));
        assert_eq!(decoder.feed(5), Ok(Decoded::NeedMore));
        assert_eq!(
            ValueDecoder::decode(vec![1, 1_000_000_000_000_000_000, 0, 5]),
            Err(DecodeError::TooFewLines)
        );
    }
}
