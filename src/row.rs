//! Row handles and typed field views.

use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use crate::chunk::RawChunk;
use crate::error::{Error, Result};
use crate::fields::RawField;
use crate::types::{classify, parse_hex, DataType};

/// One logical row of the source.
///
/// A row is a lightweight handle into its chunk: cloning is a refcount bump,
/// and the chunk's bytes stay mapped or buffered for as long as any row from
/// it is alive. Field access yields views over those bytes wherever possible;
/// only fields containing escaped quotes materialize an owned, cached copy.
#[derive(Clone)]
pub struct Row {
    chunk: Arc<RawChunk>,
    data_start: usize,
    fields_start: usize,
    len: usize,
}

impl Row {
    pub(crate) fn new(
        chunk: Arc<RawChunk>,
        data_start: usize,
        fields_start: usize,
        len: usize,
    ) -> Self {
        Row {
            chunk,
            data_start,
            fields_start,
            len,
        }
    }

    /// Number of fields in this row.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn descriptor(&self, index: usize) -> &RawField {
        // Descriptors are published before the row itself is handed out.
        self.chunk
            .fields
            .get(self.fields_start + index)
            .expect("row descriptors are published before the row")
    }

    fn make_field(&self, index: usize) -> Field<'_> {
        let desc = self.descriptor(index);
        let start = self.data_start + desc.start as usize;
        let raw = &self.chunk.bytes()[start..start + desc.len as usize];
        let bytes = if desc.has_escaped_quote {
            FieldBytes::Shared(self.chunk.unescaped(self.fields_start + index, raw))
        } else {
            FieldBytes::Borrowed(raw)
        };
        Field {
            bytes,
            cache: Cell::new(None),
        }
    }

    /// View of the `index`-th field.
    ///
    /// # Example
    ///
    /// ```
    /// use chunkcsv::{parse, Format};
    ///
    /// let rows = parse("a,b\nx,y\n", Format::new())?;
    /// assert_eq!(rows[0].field(1)?.as_str(), "y");
    /// assert!(rows[0].field(9).is_err());
    /// # Ok::<(), chunkcsv::Error>(())
    /// ```
    pub fn field(&self, index: usize) -> Result<Field<'_>> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(self.make_field(index))
    }

    /// View of the field under the named column.
    ///
    /// # Example
    ///
    /// ```
    /// use chunkcsv::{parse, Format};
    ///
    /// let rows = parse("id,score\n7,81\n", Format::new())?;
    /// assert_eq!(rows[0].get("score")?.get::<i32>()?, 81);
    /// # Ok::<(), chunkcsv::Error>(())
    /// ```
    pub fn get(&self, name: &str) -> Result<Field<'_>> {
        let index = self
            .chunk
            .col_names
            .get()
            .and_then(|cols| cols.index_of(name))
            .ok_or_else(|| Error::NotFound {
                column: name.to_owned(),
            })?;
        self.field(index)
    }

    /// Whether the given field had an escaped quote in the source.
    pub fn has_escaped_quote(&self, index: usize) -> Result<bool> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(self.descriptor(index).has_escaped_quote)
    }

    /// Iterate over the row's fields in order.
    pub fn iter(&self) -> Fields<'_> {
        Fields { row: self, next: 0 }
    }

    /// Copy every field out as an owned string.
    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(|f| f.as_str().into_owned()).collect()
    }

    /// Render the row as a JSON object keyed by column name.
    ///
    /// Numeric fields are emitted without quotes; everything else is a JSON
    /// string. Columns beyond the known names fall back to positional keys.
    ///
    /// # Example
    ///
    /// ```
    /// use chunkcsv::{parse, Format};
    ///
    /// let rows = parse("x,y\n1,hi\n", Format::new())?;
    /// assert_eq!(rows[0].to_json(), r#"{"x":1,"y":"hi"}"#);
    /// # Ok::<(), chunkcsv::Error>(())
    /// ```
    pub fn to_json(&self) -> String {
        let cols = self.chunk.col_names.get();
        let mut map = serde_json::Map::with_capacity(self.len);
        for (i, field) in self.iter().enumerate() {
            let key = cols
                .and_then(|c| c.names().get(i))
                .cloned()
                .unwrap_or_else(|| i.to_string());
            map.insert(key, field.to_json_value());
        }
        serde_json::Value::Object(map).to_string()
    }

    /// Render the row as a JSON array of values.
    pub fn to_json_array(&self) -> String {
        let values = self.iter().map(|f| f.to_json_value()).collect();
        serde_json::Value::Array(values).to_string()
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|field| field.as_str().into_owned()))
            .finish()
    }
}

impl<'r> IntoIterator for &'r Row {
    type Item = Field<'r>;
    type IntoIter = Fields<'r>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a row's fields.
pub struct Fields<'r> {
    row: &'r Row,
    next: usize,
}

impl<'r> Iterator for Fields<'r> {
    type Item = Field<'r>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.row.len {
            return None;
        }
        let field = self.row.make_field(self.next);
        self.next += 1;
        Some(field)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.row.len - self.next;
        (rest, Some(rest))
    }
}

enum FieldBytes<'r> {
    Borrowed(&'r [u8]),
    Shared(Arc<[u8]>),
}

impl FieldBytes<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            FieldBytes::Borrowed(b) => b,
            FieldBytes::Shared(b) => b,
        }
    }
}

/// Typed view of a single field.
///
/// The view borrows the row it came from; grab an owned `String` or a number
/// to retain a value past the row's lifetime. Classification runs once per
/// view and is cached.
pub struct Field<'r> {
    bytes: FieldBytes<'r>,
    cache: Cell<Option<(DataType, f64)>>,
}

impl<'r> Field<'r> {
    /// The field's bytes, unescaped if the source contained doubled quotes.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// The field as text.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }

    fn classified(&self) -> (DataType, f64) {
        if let Some(hit) = self.cache.get() {
            return hit;
        }
        let computed = classify(self.bytes(), b'.');
        self.cache.set(Some(computed));
        computed
    }

    /// The classified type of the underlying bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use chunkcsv::{parse, DataType, Format};
    ///
    /// let rows = parse("v\n-3\n2.5\ntext\n\n", Format::new())?;
    /// assert_eq!(rows[0].field(0)?.data_type(), DataType::Int8);
    /// assert_eq!(rows[1].field(0)?.data_type(), DataType::Double);
    /// assert_eq!(rows[2].field(0)?.data_type(), DataType::Str);
    /// # Ok::<(), chunkcsv::Error>(())
    /// ```
    pub fn data_type(&self) -> DataType {
        self.classified().0
    }

    pub(crate) fn value(&self) -> f64 {
        self.classified().1
    }

    /// True for an empty string or a string of whitespace.
    pub fn is_null(&self) -> bool {
        self.data_type() == DataType::Null
    }

    /// True for non-numeric text.
    pub fn is_str(&self) -> bool {
        self.data_type() == DataType::Str
    }

    /// True for any numeric value.
    pub fn is_num(&self) -> bool {
        self.data_type().is_num()
    }

    /// True for integers of any width.
    pub fn is_int(&self) -> bool {
        self.data_type().is_int()
    }

    /// True for floating-point values.
    pub fn is_float(&self) -> bool {
        self.data_type().is_float()
    }

    /// Convert the field to `T`, checking the classified type first.
    ///
    /// Distinct failures: requesting a number from text is
    /// [`Error::NotANumber`], an integer from a float is
    /// [`Error::FloatToInt`], an unsigned type from a negative value is
    /// [`Error::NegativeToUnsigned`], and a type narrower than the value is
    /// [`Error::Overflow`]. `get::<String>()` always succeeds.
    ///
    /// # Example
    ///
    /// ```
    /// use chunkcsv::{parse, Error, Format};
    ///
    /// let rows = parse("v\n300\n", Format::new())?;
    /// let field = rows[0].field(0)?;
    /// assert_eq!(field.get::<i16>()?, 300);
    /// assert!(matches!(field.get::<i8>(), Err(Error::Overflow { .. })));
    /// # Ok::<(), chunkcsv::Error>(())
    /// ```
    pub fn get<T: FromField>(&self) -> Result<T> {
        T::from_field(self)
    }

    /// Non-failing variant of [`Field::get`].
    pub fn try_get<T: FromField>(&self) -> Option<T> {
        T::from_field(self).ok()
    }

    /// Parse the field as a bare hexadecimal value.
    pub fn try_parse_hex(&self) -> Option<i64> {
        parse_hex(self.bytes())
    }

    /// Re-classify with a custom decimal separator and return the numeric
    /// value if there is one.
    pub fn try_parse_decimal(&self, decimal_sep: u8) -> Option<f64> {
        let (dtype, value) = classify(self.bytes(), decimal_sep);
        dtype.is_num().then_some(value)
    }

    /// Numeric comparison with a small tolerance for floating-point noise.
    pub fn eq_number(&self, other: f64) -> bool {
        self.is_num() && (self.value() - other).abs() < 1e-3
    }

    fn to_json_value(&self) -> serde_json::Value {
        let (dtype, value) = self.classified();
        if dtype.is_int() {
            if value >= i64::MIN as f64 && value <= i64::MAX as f64 {
                return serde_json::Value::from(value as i64);
            }
            if let Some(n) = serde_json::Number::from_f64(value) {
                return serde_json::Value::Number(n);
            }
        } else if dtype.is_float() {
            if let Some(n) = serde_json::Number::from_f64(value) {
                return serde_json::Value::Number(n);
            }
        }
        serde_json::Value::String(self.as_str().into_owned())
    }
}

impl PartialEq<&str> for Field<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.bytes() == other.as_bytes()
    }
}

// Parsed fields can be fed straight back into a writer, so filtering a file
// is `write_record(row.iter())` per kept row.
impl crate::writer::WriteValue for Field<'_> {
    fn render(&self, _: usize) -> Cow<'_, str> {
        self.as_str()
    }
}

impl fmt::Debug for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({:?})", self.as_str())
    }
}

/// Conversion from a [`Field`] used by [`Field::get`].
pub trait FromField: Sized {
    /// Convert, reporting the precise failure mode.
    fn from_field(field: &Field<'_>) -> Result<Self>;
}

impl FromField for String {
    fn from_field(field: &Field<'_>) -> Result<Self> {
        Ok(field.as_str().into_owned())
    }
}

impl FromField for f64 {
    fn from_field(field: &Field<'_>) -> Result<Self> {
        let dtype = field.data_type();
        if !dtype.is_num() {
            return Err(Error::NotANumber {
                found: dtype.name(),
                requested: "f64",
            });
        }
        Ok(field.value())
    }
}

macro_rules! from_field_signed {
    ($($t:ty => $widest:expr),* $(,)?) => {$(
        impl FromField for $t {
            fn from_field(field: &Field<'_>) -> Result<Self> {
                let dtype = field.data_type();
                if !dtype.is_num() {
                    return Err(Error::NotANumber {
                        found: dtype.name(),
                        requested: stringify!($t),
                    });
                }
                if dtype.is_float() {
                    return Err(Error::FloatToInt {
                        requested: stringify!($t),
                    });
                }
                if dtype > $widest {
                    return Err(Error::Overflow {
                        found: dtype.name(),
                        requested: stringify!($t),
                    });
                }
                Ok(field.value() as $t)
            }
        }
    )*};
}

from_field_signed! {
    i8 => DataType::Int8,
    i16 => DataType::Int16,
    i32 => DataType::Int32,
    i64 => DataType::Int64,
}

macro_rules! from_field_unsigned {
    ($($t:ty),* $(,)?) => {$(
        impl FromField for $t {
            fn from_field(field: &Field<'_>) -> Result<Self> {
                let dtype = field.data_type();
                if !dtype.is_num() {
                    return Err(Error::NotANumber {
                        found: dtype.name(),
                        requested: stringify!($t),
                    });
                }
                if dtype.is_float() {
                    return Err(Error::FloatToInt {
                        requested: stringify!($t),
                    });
                }
                let value = field.value();
                if value < 0.0 {
                    return Err(Error::NegativeToUnsigned {
                        requested: stringify!($t),
                    });
                }
                if value > <$t>::MAX as f64 {
                    return Err(Error::Overflow {
                        found: dtype.name(),
                        requested: stringify!($t),
                    });
                }
                Ok(value as $t)
            }
        }
    )*};
}

from_field_unsigned!(u8, u16, u32, u64);
