use std::collections::HashMap;

use crate::error::ModelError;

/// A scalar layer parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Integer parameter.
    Int(i32),
    /// Floating point parameter.
    Float(f32),
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        ParamValue::Float(value)
    }
}

/// Layer parameters keyed by small integer ids.
///
/// Missing keys resolve to the default given by the caller.
///
/// # Example
///
/// ```rust
/// use lumen_model::param::ParamDict;
///
/// let mut pd = ParamDict::new();
/// pd.set(0, 16);
///
/// assert_eq!(pd.get_usize(0, 0).unwrap(), 16);
/// assert_eq!(pd.get_usize(2, 1).unwrap(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParamDict {
    values: HashMap<u32, ParamValue>,
}

impl ParamDict {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets parameter `id`, replacing any previous value.
    pub fn set(&mut self, id: u32, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(id, value.into());
        self
    }

    /// Returns the raw value of parameter `id`, if present.
    pub fn get(&self, id: u32) -> Option<ParamValue> {
        self.values.get(&id).copied()
    }

    /// Returns integer parameter `id`, or `default` when missing.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidParam`] if the stored value is a float.
    pub fn get_int(&self, id: u32, default: i32) -> Result<i32, ModelError> {
        match self.get(id) {
            None => Ok(default),
            Some(ParamValue::Int(v)) => Ok(v),
            Some(ParamValue::Float(v)) => Err(ModelError::InvalidParam {
                id,
                reason: format!("expected an integer, got {v}"),
            }),
        }
    }

    /// Returns a non-negative integer parameter as `usize`.
    pub fn get_usize(&self, id: u32, default: usize) -> Result<usize, ModelError> {
        match self.get(id) {
            None => Ok(default),
            Some(_) => {
                let v = self.get_int(id, 0)?;
                usize::try_from(v).map_err(|_| ModelError::InvalidParam {
                    id,
                    reason: format!("expected a non-negative integer, got {v}"),
                })
            }
        }
    }

    /// Returns a flag parameter, any non-zero integer meaning true.
    pub fn get_bool(&self, id: u32, default: bool) -> Result<bool, ModelError> {
        Ok(self.get_int(id, default as i32)? != 0)
    }

    /// Returns float parameter `id`, or `default` when missing. Integers are widened.
    pub fn get_float(&self, id: u32, default: f32) -> f32 {
        match self.get(id) {
            None => default,
            Some(ParamValue::Int(v)) => v as f32,
            Some(ParamValue::Float(v)) => v,
        }
    }
}
