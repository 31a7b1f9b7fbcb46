//! View descriptor - the mutable logical description of a cube

use crate::dimension::{descriptors, AxisIndex, DimensionDescriptor};
use crate::error::{CubeError, Result};
use crate::layout::LayoutDescriptor;
use crate::types::{Axis, EncodingType, ProcessingLocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Raw values excluded from statistics, compared bit-exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BadValueSet {
    values: Vec<f64>,
}

impl BadValueSet {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        let mut values: Vec<f64> = values.into_iter().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| a.to_bits() == b.to_bits());
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: f64) -> bool {
        match self.values.len() {
            0 => false,
            1 => self.values[0].to_bits() == value.to_bits(),
            _ => self
                .values
                .binary_search_by(|entry| entry.total_cmp(&value))
                .is_ok(),
        }
    }
}

impl PartialEq for BadValueSet {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for BadValueSet {}

impl Hash for BadValueSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.values {
            value.to_bits().hash(state);
        }
    }
}

/// Bad values declared for the cube, globally or per on-disk band
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadValues {
    pub global: BadValueSet,
    pub per_band: BTreeMap<u32, BadValueSet>,
}

impl BadValues {
    pub fn global(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            global: BadValueSet::new(values),
            per_band: BTreeMap::new(),
        }
    }

    pub fn with_band(mut self, on_disk_band: u32, values: impl IntoIterator<Item = f64>) -> Self {
        self.per_band.insert(on_disk_band, BadValueSet::new(values));
        self
    }

    /// Set in force for an on-disk band
    pub fn for_band(&self, on_disk_band: u32) -> &BadValueSet {
        self.per_band.get(&on_disk_band).unwrap_or(&self.global)
    }
}

/// Logical view of a cube: active subset, encoding, residency and bad values.
///
/// Every mutation is validated against the layout when it is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    rows: Vec<DimensionDescriptor>,
    columns: Vec<DimensionDescriptor>,
    bands: Vec<DimensionDescriptor>,
    encoding: EncodingType,
    processing_location: ProcessingLocation,
    bad_values: BadValues,
}

impl ViewDescriptor {
    /// View exposing every on-disk index of `layout`
    pub fn for_layout(layout: &LayoutDescriptor, location: ProcessingLocation) -> Self {
        Self {
            rows: descriptors(layout.rows),
            columns: descriptors(layout.columns),
            bands: descriptors(layout.bands),
            encoding: layout.encoding,
            processing_location: location,
            bad_values: BadValues::default(),
        }
    }

    pub fn rows(&self) -> &[DimensionDescriptor] {
        &self.rows
    }

    pub fn columns(&self) -> &[DimensionDescriptor] {
        &self.columns
    }

    pub fn bands(&self) -> &[DimensionDescriptor] {
        &self.bands
    }

    pub fn active(&self, axis: Axis) -> &[DimensionDescriptor] {
        match axis {
            Axis::Row => &self.rows,
            Axis::Column => &self.columns,
            Axis::Band => &self.bands,
        }
    }

    pub fn encoding(&self) -> EncodingType {
        self.encoding
    }

    pub fn processing_location(&self) -> ProcessingLocation {
        self.processing_location
    }

    pub fn bad_values(&self) -> &BadValues {
        &self.bad_values
    }

    /// Replace one axis's active list.
    pub fn set_active(
        &mut self,
        axis: Axis,
        list: Vec<DimensionDescriptor>,
        layout: &LayoutDescriptor,
    ) -> Result<()> {
        Self::check_axis(axis, &list, layout)?;
        match axis {
            Axis::Row => self.rows = list,
            Axis::Column => self.columns = list,
            Axis::Band => self.bands = list,
        }
        Ok(())
    }

    /// The encoding may only match the stored encoding; conversion is an explicit copy.
    pub fn set_encoding(&mut self, encoding: EncodingType, layout: &LayoutDescriptor) -> Result<()> {
        if encoding != layout.encoding {
            return Err(CubeError::invalid(format!(
                "cannot view {} data as {}; convert into a new store instead",
                layout.encoding, encoding
            )));
        }
        self.encoding = encoding;
        Ok(())
    }

    pub fn set_bad_values(&mut self, bad_values: BadValues, layout: &LayoutDescriptor) -> Result<()> {
        if let Some(&band) = bad_values.per_band.keys().find(|&&band| band >= layout.bands) {
            return Err(CubeError::invalid(format!(
                "bad values declared for band {} of {}",
                band, layout.bands
            )));
        }
        self.bad_values = bad_values;
        Ok(())
    }

    pub(crate) fn set_processing_location(&mut self, location: ProcessingLocation) {
        self.processing_location = location;
    }

    /// Check the whole view against a layout.
    pub fn validate(&self, layout: &LayoutDescriptor) -> Result<()> {
        Self::check_axis(Axis::Row, &self.rows, layout)?;
        Self::check_axis(Axis::Column, &self.columns, layout)?;
        Self::check_axis(Axis::Band, &self.bands, layout)?;
        if self.encoding != layout.encoding {
            return Err(CubeError::invalid(format!(
                "view encoding {} differs from stored {}",
                self.encoding, layout.encoding
            )));
        }
        Ok(())
    }

    fn check_axis(axis: Axis, list: &[DimensionDescriptor], layout: &LayoutDescriptor) -> Result<()> {
        if list.is_empty() {
            return Err(CubeError::invalid(format!("active {} list is empty", axis)));
        }
        AxisIndex::build(axis, list)?;

        let extent = match axis {
            Axis::Row => layout.rows,
            Axis::Column => layout.columns,
            Axis::Band => layout.bands,
        };
        for dim in list {
            match dim.on_disk() {
                Some(number) if number < extent => {}
                other => {
                    return Err(CubeError::invalid(format!(
                        "active {} {:?} maps to on-disk {:?}, extent is {}",
                        axis,
                        dim.active(),
                        other,
                        extent
                    )))
                }
            }
        }
        Ok(())
    }
}
