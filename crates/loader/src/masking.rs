//! Bit-flag masks over quality bands.
//!
//! A measurement's `flags_definition` names groups of bits and the meaning
//! of each value they can take. [`make_mask`] turns a set of
//! `(flag, meaning)` conditions into a boolean mask.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, ArrayViewMut2, Zip};
use serde::Serialize;
use serde_json::Value;

use catalog::FlagDefinition;

use crate::error::{LoadError, Result};
use crate::fuse::is_nodata;

/// Human-readable summary of one flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagDescription {
    pub name: String,
    pub bits: Vec<u32>,
    /// (value, meaning) pairs, ascending by value.
    pub values: Vec<(u64, String)>,
    pub description: Option<String>,
}

fn meaning(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// List the flags of a band.
pub fn describe_flags(flags: &BTreeMap<String, FlagDefinition>) -> Vec<FlagDescription> {
    flags
        .iter()
        .map(|(name, def)| {
            let mut values: Vec<(u64, String)> = def
                .values
                .iter()
                .filter_map(|(k, v)| Some((k.parse().ok()?, meaning(v))))
                .collect();
            values.sort_by_key(|(k, _)| *k);
            FlagDescription {
                name: name.clone(),
                bits: def.bits.positions(),
                values,
                description: def.description.clone(),
            }
        })
        .collect()
}

/// A resolved condition: pixels whose `(v & mask) >> shift == expected`.
#[derive(Debug, Clone, Copy)]
struct BitTest {
    mask: u64,
    shift: u32,
    expected: u64,
}

impl BitTest {
    fn resolve(flags: &BTreeMap<String, FlagDefinition>, flag: &str, wanted: &str) -> Result<Self> {
        let def = flags
            .get(flag)
            .ok_or_else(|| LoadError::InvalidMask(format!("unknown flag '{}'", flag)))?;

        let positions = def.bits.positions();
        let shift = positions.iter().copied().min().unwrap_or(0);
        if positions.iter().any(|&p| p >= 64) {
            return Err(LoadError::InvalidMask(format!(
                "flag '{}' uses bits beyond 63",
                flag
            )));
        }
        let mask = positions.iter().fold(0u64, |m, &p| m | (1 << p));

        let expected = def
            .values
            .iter()
            .find(|(_, v)| meaning(v).eq_ignore_ascii_case(wanted))
            .map(|(k, _)| k.as_str())
            .or_else(|| def.values.contains_key(wanted).then_some(wanted))
            .and_then(|k| k.parse::<u64>().ok())
            .ok_or_else(|| {
                LoadError::InvalidMask(format!("flag '{}' has no value '{}'", flag, wanted))
            })?;

        Ok(Self {
            mask,
            shift,
            expected,
        })
    }

    fn matches(&self, pixel: f64) -> bool {
        if !pixel.is_finite() || pixel < 0.0 {
            return false;
        }
        ((pixel as u64 & self.mask) >> self.shift) == self.expected
    }
}

/// Pixels of `plane` meeting every `(flag, meaning)` condition.
///
/// Meanings are matched case-insensitively against the flag's value table;
/// a raw value such as `"1"` is accepted too. Non-finite pixels never match.
pub fn make_mask(
    plane: &ArrayView2<f64>,
    flags: &BTreeMap<String, FlagDefinition>,
    conditions: &[(&str, &str)],
) -> Result<Array2<bool>> {
    if conditions.is_empty() {
        return Err(LoadError::InvalidMask("no flag conditions given".to_string()));
    }
    let tests = conditions
        .iter()
        .map(|(flag, wanted)| BitTest::resolve(flags, flag, wanted))
        .collect::<Result<Vec<_>>>()?;

    Ok(plane.map(|&v| tests.iter().all(|t| t.matches(v))))
}

/// Pixels of `plane` that are not nodata.
pub fn valid_data_mask(plane: &ArrayView2<f64>, nodata: f64) -> Array2<bool> {
    plane.map(|&v| !is_nodata(v, nodata))
}

/// Set every pixel outside `mask` to `nodata`.
pub fn apply_mask(plane: &mut ArrayViewMut2<f64>, mask: &ArrayView2<bool>, nodata: f64) {
    Zip::from(plane).and(mask).for_each(|v, &keep| {
        if !keep {
            *v = nodata;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::Product;
    use ndarray::array;
    use test_utils::{eo3_product, yaml_doc, LS8_PRODUCT};

    fn fmask_flags() -> BTreeMap<String, FlagDefinition> {
        let product: std::sync::Arc<Product> = eo3_product(&yaml_doc(LS8_PRODUCT).unwrap()).unwrap();
        product
            .measurement("fmask")
            .and_then(|m| m.flags_definition.clone())
            .unwrap()
    }

    #[test]
    fn test_make_mask_by_meaning() {
        let flags = fmask_flags();
        let plane = array![[1.0, 2.0], [5.0, 0.0]];

        let clear = make_mask(&plane.view(), &flags, &[("fmask", "valid")]).unwrap();
        assert_eq!(clear, array![[true, false], [false, false]]);

        let water = make_mask(&plane.view(), &flags, &[("fmask", "Water")]).unwrap();
        assert_eq!(water, array![[false, false], [true, false]]);
    }

    #[test]
    fn test_single_bit_flag_and_conjunction() {
        let flags = fmask_flags();
        // 2 = 0b010 and 3 = 0b011 have bit 1 set.
        let plane = array![[2.0, 3.0, 1.0, f64::NAN]];

        let cloud = make_mask(&plane.view(), &flags, &[("cloud", "true")]).unwrap();
        assert_eq!(cloud, array![[true, true, false, false]]);

        let both = make_mask(&plane.view(), &flags, &[("cloud", "true"), ("fmask", "shadow")]).unwrap();
        assert_eq!(both, array![[false, true, false, false]]);
    }

    #[test]
    fn test_invalid_conditions() {
        let flags = fmask_flags();
        let plane = array![[1.0]];
        assert!(matches!(
            make_mask(&plane.view(), &flags, &[("haze", "true")]),
            Err(LoadError::InvalidMask(_))
        ));
        assert!(matches!(
            make_mask(&plane.view(), &flags, &[("fmask", "lava")]),
            Err(LoadError::InvalidMask(_))
        ));
        assert!(make_mask(&plane.view(), &flags, &[]).is_err());
    }

    #[test]
    fn test_describe_flags() {
        let described = describe_flags(&fmask_flags());
        let names: Vec<_> = described.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["cloud", "fmask"]);
        assert_eq!(described[0].bits, vec![1]);
        assert_eq!(described[0].values, vec![(0, "false".into()), (1, "true".into())]);
        assert_eq!(described[1].values[2], (2, "cloud".to_string()));
    }

    #[test]
    fn test_valid_and_apply_mask() {
        let mut plane = array![[-999.0, 4.0], [5.0, 6.0]];
        let valid = valid_data_mask(&plane.view(), -999.0);
        assert_eq!(valid, array![[false, true], [true, true]]);

        let keep = array![[true, true], [false, true]];
        apply_mask(&mut plane.view_mut(), &keep.view(), -999.0);
        assert_eq!(plane, array![[-999.0, 4.0], [-999.0, 6.0]]);
    }
}
