//! Element types that can cross the native boundary.

use nalgebra::ComplexField;
use num_complex::Complex64;

/// A matrix element type understood by the native libraries.
///
/// Implemented for `f64` and [`Complex64`]. Complex values are passed to
/// native code as interleaved `(re, im)` pairs, which is exactly the memory
/// layout of `Complex<f64>` (`#[repr(C)]`), so no conversion copy is needed.
pub trait Element:
    ComplexField<RealField = f64> + Copy + Default + PartialEq + std::fmt::Debug
{
    /// Whether values carry an imaginary part.
    const IS_COMPLEX: bool;

    /// Short name used in log messages.
    const NAME: &'static str;

    /// Number of `f64` slots one value occupies in native memory.
    const SCALARS: usize = if Self::IS_COMPLEX { 2 } else { 1 };

    /// Build an element from a complex number, dropping the imaginary part for reals.
    fn from_complex(value: Complex64) -> Self;

    /// Widen to a complex number.
    fn to_complex(self) -> Complex64;

    /// View a slice of elements as the `f64` array native code expects.
    fn as_scalars(values: &[Self]) -> *const f64 {
        values.as_ptr().cast::<f64>()
    }
}

impl Element for f64 {
    const IS_COMPLEX: bool = false;
    const NAME: &'static str = "real";

    fn from_complex(value: Complex64) -> Self {
        value.re
    }

    fn to_complex(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }
}

impl Element for Complex64 {
    const IS_COMPLEX: bool = true;
    const NAME: &'static str = "complex";

    fn from_complex(value: Complex64) -> Self {
        value
    }

    fn to_complex(self) -> Complex64 {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complex_layout_is_interleaved() {
        let values = [Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)];
        let ptr = Complex64::as_scalars(&values);
        let raw = unsafe { std::slice::from_raw_parts(ptr, 4) };
        assert_eq!(raw, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(Complex64::SCALARS, 2);
        assert_eq!(f64::SCALARS, 1);
    }

    #[test]
    fn test_complex_conversions() {
        let z = Complex64::new(1.5, -2.0);
        assert_eq!(f64::from_complex(z), 1.5);
        assert_eq!(2.0f64.to_complex(), Complex64::new(2.0, 0.0));
        assert_eq!(Complex64::from_complex(z), z);
    }
}
