//! Core data types for raster cubes

use num_traits::{Bounded, NumCast};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element encodings supported by a cube. Elements are stored little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncodingType {
    /// Signed 8-bit integer
    Int1S = 0,
    /// Unsigned 8-bit integer
    Int1U = 1,
    /// Signed 16-bit integer
    Int2S = 2,
    /// Unsigned 16-bit integer
    Int2U = 3,
    /// Complex pair of signed 16-bit integers (real, imaginary)
    Int4SComplex = 4,
    /// Signed 32-bit integer
    Int4S = 5,
    /// Unsigned 32-bit integer
    Int4U = 6,
    /// 32-bit floating point
    Flt4 = 7,
    /// Complex pair of 32-bit floats (real, imaginary)
    Flt8Complex = 8,
    /// 64-bit floating point
    Flt8 = 9,
}

impl EncodingType {
    /// Size in bytes of one element
    pub fn bytes_per_element(&self) -> usize {
        match self {
            EncodingType::Int1S | EncodingType::Int1U => 1,
            EncodingType::Int2S | EncodingType::Int2U => 2,
            EncodingType::Int4S
            | EncodingType::Int4U
            | EncodingType::Flt4
            | EncodingType::Int4SComplex => 4,
            EncodingType::Flt8 | EncodingType::Flt8Complex => 8,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, EncodingType::Int4SComplex | EncodingType::Flt8Complex)
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            EncodingType::Flt4 | EncodingType::Flt8 | EncodingType::Flt8Complex
        )
    }

    /// Whether values read through `component` are always whole numbers.
    pub fn is_integer_valued(&self, component: ComplexComponent) -> bool {
        match self {
            EncodingType::Int4SComplex => matches!(
                component,
                ComplexComponent::InPhase | ComplexComponent::Quadrature
            ),
            other => !other.is_float(),
        }
    }

    /// Decode one element into a double.
    ///
    /// `bytes` must hold at least `bytes_per_element()` bytes. The complex component is ignored
    /// for scalar encodings.
    pub fn decode(&self, bytes: &[u8], component: ComplexComponent) -> f64 {
        match self {
            EncodingType::Int1S => i8::from_le_bytes(le(bytes)) as f64,
            EncodingType::Int1U => bytes[0] as f64,
            EncodingType::Int2S => i16::from_le_bytes(le(bytes)) as f64,
            EncodingType::Int2U => u16::from_le_bytes(le(bytes)) as f64,
            EncodingType::Int4S => i32::from_le_bytes(le(bytes)) as f64,
            EncodingType::Int4U => u32::from_le_bytes(le(bytes)) as f64,
            EncodingType::Flt4 => f32::from_le_bytes(le(bytes)) as f64,
            EncodingType::Flt8 => f64::from_le_bytes(le(bytes)),
            EncodingType::Int4SComplex => {
                let re = i16::from_le_bytes(le(bytes)) as f64;
                let im = i16::from_le_bytes(le(&bytes[2..])) as f64;
                component.apply(re, im)
            }
            EncodingType::Flt8Complex => {
                let re = f32::from_le_bytes(le(bytes)) as f64;
                let im = f32::from_le_bytes(le(&bytes[4..])) as f64;
                component.apply(re, im)
            }
        }
    }

    /// Encode a double into one element, saturating integer encodings at their bounds.
    ///
    /// Complex encodings receive the value as the real part with a zero imaginary part.
    pub fn encode(&self, value: f64, out: &mut [u8]) {
        match self {
            EncodingType::Int1S => out[..1].copy_from_slice(&saturate::<i8>(value).to_le_bytes()),
            EncodingType::Int1U => out[0] = saturate::<u8>(value),
            EncodingType::Int2S => out[..2].copy_from_slice(&saturate::<i16>(value).to_le_bytes()),
            EncodingType::Int2U => out[..2].copy_from_slice(&saturate::<u16>(value).to_le_bytes()),
            EncodingType::Int4S => out[..4].copy_from_slice(&saturate::<i32>(value).to_le_bytes()),
            EncodingType::Int4U => out[..4].copy_from_slice(&saturate::<u32>(value).to_le_bytes()),
            EncodingType::Flt4 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            EncodingType::Flt8 => out[..8].copy_from_slice(&value.to_le_bytes()),
            EncodingType::Int4SComplex => {
                out[..2].copy_from_slice(&saturate::<i16>(value).to_le_bytes());
                out[2..4].copy_from_slice(&0i16.to_le_bytes());
            }
            EncodingType::Flt8Complex => {
                out[..4].copy_from_slice(&(value as f32).to_le_bytes());
                out[4..8].copy_from_slice(&0f32.to_le_bytes());
            }
        }
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    raw
}

fn saturate<T: NumCast + Bounded>(value: f64) -> T {
    if value.is_nan() {
        return <T as NumCast>::from(0u8).unwrap_or_else(T::min_value);
    }
    match <T as NumCast>::from(value.round()) {
        Some(converted) => converted,
        None if value > 0.0 => T::max_value(),
        None => T::min_value(),
    }
}

/// Component of a complex element to read as a scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComplexComponent {
    #[default]
    Magnitude,
    /// Phase angle in radians
    Phase,
    /// Real part
    InPhase,
    /// Imaginary part
    Quadrature,
}

impl ComplexComponent {
    fn apply(&self, re: f64, im: f64) -> f64 {
        match self {
            ComplexComponent::Magnitude => re.hypot(im),
            ComplexComponent::Phase => im.atan2(re),
            ComplexComponent::InPhase => re,
            ComplexComponent::Quadrature => im,
        }
    }
}

/// Physical or logical element ordering of a cube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterleaveFormat {
    /// Band interleaved by pixel: all bands of one pixel are contiguous.
    Bip,
    /// Band sequential: one contiguous plane per band.
    Bsq,
    /// Band interleaved by line: one row of one band, then the same row of the next band.
    Bil,
}

impl fmt::Display for InterleaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterleaveFormat::Bip => "BIP",
            InterleaveFormat::Bsq => "BSQ",
            InterleaveFormat::Bil => "BIL",
        };
        f.write_str(name)
    }
}

/// Where the cube's data lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingLocation {
    /// Entire cube is resident in memory.
    InMemory,
    /// Paged from disk, writable.
    OnDisk,
    /// Paged from disk, read-only.
    OnDiskReadOnly,
}

impl ProcessingLocation {
    pub fn is_writable(&self) -> bool {
        !matches!(self, ProcessingLocation::OnDiskReadOnly)
    }
}

/// One of the three cube axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Column,
    Band,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Row => "row",
            Axis::Column => "column",
            Axis::Band => "band",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_sizes() {
        assert_eq!(EncodingType::Int1U.bytes_per_element(), 1);
        assert_eq!(EncodingType::Int2S.bytes_per_element(), 2);
        assert_eq!(EncodingType::Int4SComplex.bytes_per_element(), 4);
        assert_eq!(EncodingType::Flt4.bytes_per_element(), 4);
        assert_eq!(EncodingType::Flt8Complex.bytes_per_element(), 8);
        assert_eq!(EncodingType::Flt8.bytes_per_element(), 8);
    }

    #[test]
    fn test_integer_encode_saturates() {
        let mut out = [0u8; 4];
        EncodingType::Int1U.encode(300.0, &mut out);
        assert_eq!(out[0], 255);
        EncodingType::Int1U.encode(-4.0, &mut out);
        assert_eq!(out[0], 0);
        EncodingType::Int2S.encode(-40000.0, &mut out);
        assert_eq!(EncodingType::Int2S.decode(&out, ComplexComponent::Magnitude), -32768.0);
        EncodingType::Int4U.encode(f64::NAN, &mut out);
        assert_eq!(EncodingType::Int4U.decode(&out, ComplexComponent::Magnitude), 0.0);
    }

    #[test]
    fn test_complex_components() {
        let mut raw = [0u8; 4];
        raw[..2].copy_from_slice(&3i16.to_le_bytes());
        raw[2..].copy_from_slice(&4i16.to_le_bytes());
        let enc = EncodingType::Int4SComplex;
        assert_eq!(enc.decode(&raw, ComplexComponent::Magnitude), 5.0);
        assert_eq!(enc.decode(&raw, ComplexComponent::InPhase), 3.0);
        assert_eq!(enc.decode(&raw, ComplexComponent::Quadrature), 4.0);
        let phase = enc.decode(&raw, ComplexComponent::Phase);
        assert!((phase - (4.0f64).atan2(3.0)).abs() < 1e-12);

        assert!(!enc.is_integer_valued(ComplexComponent::Magnitude));
        assert!(enc.is_integer_valued(ComplexComponent::InPhase));
    }

    #[test]
    fn test_float_decode() {
        let mut out = [0u8; 8];
        EncodingType::Flt8.encode(-1.25, &mut out);
        assert_eq!(EncodingType::Flt8.decode(&out, ComplexComponent::Magnitude), -1.25);
        EncodingType::Flt8Complex.encode(2.5, &mut out);
        assert_eq!(
            EncodingType::Flt8Complex.decode(&out, ComplexComponent::Quadrature),
            0.0
        );
    }

    #[test]
    fn test_location_writable() {
        assert!(ProcessingLocation::InMemory.is_writable());
        assert!(ProcessingLocation::OnDisk.is_writable());
        assert!(!ProcessingLocation::OnDiskReadOnly.is_writable());
    }
}
