// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parameters of the bounded engine.
//!
//! | name             | type | default     |
//! |------------------|------|-------------|
//! | `int_min`        | int  | -8          |
//! | `int_max`        | int  | 8           |
//! | `universe_size`  | int  | 2           |
//! | `max_candidates` | int  | 1000000     |
//! | `sleep_ms`       | int  | 0           |
//! | `minimize_cores` | bool | true        |
//! | `seed`           | int  | 0           |
//!
//! Doubles are never accepted.

use runner::conf::ParamValue;

use crate::BoundedError;

/// Bounds and knobs of the enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedOptions {
    /// Smallest value enumerated for integers
    pub int_min: i64,
    /// Largest value enumerated for integers
    pub int_max: i64,
    /// Minimum number of elements of each uninterpreted sort
    pub universe_size: u32,
    /// Give up with `unknown` on search spaces larger than this
    pub max_candidates: u64,
    /// Delay before every check, polling for interrupts
    pub sleep_ms: u64,
    /// Shrink unsat cores by deletion
    pub minimize_cores: bool,
    /// Accepted for compatibility; enumeration is deterministic
    pub seed: i64,
}

impl Default for BoundedOptions {
    fn default() -> Self {
        Self {
            int_min: -8,
            int_max: 8,
            universe_size: 2,
            max_candidates: 1_000_000,
            sleep_ms: 0,
            minimize_cores: true,
            seed: 0,
        }
    }
}

fn non_negative(name: &str, v: i64) -> Result<u64, BoundedError> {
    u64::try_from(v).map_err(|_| BoundedError::InvalidParameter {
        name: name.to_string(),
        value: v.to_string(),
    })
}

impl BoundedOptions {
    /// Set the parameter `name`.
    pub fn set(&mut self, name: &str, value: &ParamValue) -> Result<(), BoundedError> {
        match (name, value) {
            ("int_min", ParamValue::Int(v)) => self.int_min = *v,
            ("int_max", ParamValue::Int(v)) => self.int_max = *v,
            ("universe_size", ParamValue::Int(v)) => {
                self.universe_size = u32::try_from(*v)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| BoundedError::InvalidParameter {
                        name: name.to_string(),
                        value: v.to_string(),
                    })?;
            }
            ("max_candidates", ParamValue::Int(v)) => {
                self.max_candidates = non_negative(name, *v)?;
            }
            ("sleep_ms", ParamValue::Int(v)) => self.sleep_ms = non_negative(name, *v)?,
            ("minimize_cores", ParamValue::Bool(b)) => self.minimize_cores = *b,
            ("seed", ParamValue::Int(v)) => self.seed = *v,
            _ => {
                return Err(BoundedError::UnsupportedParameter {
                    name: name.to_string(),
                    kind: value.type_name(),
                })
            }
        }
        Ok(())
    }

    /// The integer range, if it is not empty.
    pub fn int_range(&self) -> Result<(i64, i64), BoundedError> {
        if self.int_min > self.int_max {
            return Err(BoundedError::EmptyRange(self.int_min, self.int_max));
        }
        Ok((self.int_min, self.int_max))
    }
}

#[cfg(test)]
mod tests {
    use runner::conf::ParamValue;

    use super::BoundedOptions;
    use crate::BoundedError;

    #[test]
    fn test_set_known_parameters() {
        let mut options = BoundedOptions::default();
        options.set("int_min", &ParamValue::Int(0)).unwrap();
        options.set("int_max", &ParamValue::Int(3)).unwrap();
        options.set("universe_size", &ParamValue::Int(4)).unwrap();
        options.set("minimize_cores", &ParamValue::Bool(false)).unwrap();
        assert_eq!(options.int_range(), Ok((0, 3)));
        assert_eq!(options.universe_size, 4);
        assert!(!options.minimize_cores);
    }

    #[test]
    fn test_reject_parameters() {
        let mut options = BoundedOptions::default();
        assert_eq!(
            options.set("int_min", &ParamValue::Double(0.5)),
            Err(BoundedError::UnsupportedParameter {
                name: "int_min".to_string(),
                kind: "double"
            })
        );
        assert!(matches!(
            options.set("model.completion", &ParamValue::Bool(true)),
            Err(BoundedError::UnsupportedParameter { .. })
        ));
        assert!(matches!(
            options.set("universe_size", &ParamValue::Int(0)),
            Err(BoundedError::InvalidParameter { .. })
        ));
        assert!(matches!(
            options.set("sleep_ms", &ParamValue::Int(-1)),
            Err(BoundedError::InvalidParameter { .. })
        ));
        assert_eq!(options, BoundedOptions::default());
    }

    #[test]
    fn test_empty_range() {
        let mut options = BoundedOptions::default();
        options.set("int_min", &ParamValue::Int(10)).unwrap();
        assert_eq!(options.int_range(), Err(BoundedError::EmptyRange(10, 8)));
    }
}
