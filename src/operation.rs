use ndarray::ArrayD;

use crate::models::DType;
use crate::source::VolumeData;

/// Trait for array elements.
pub trait Element:
    Clone
    + Copy
    + PartialOrd
    + num_traits::Bounded
    + num_traits::ToPrimitive
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Runtime pixel type of the element.
    const DTYPE: DType;

    /// Wrap an array of this element type as [VolumeData].
    fn into_volume(array: ArrayD<Self>) -> VolumeData;
}

macro_rules! impl_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            fn into_volume(array: ArrayD<Self>) -> VolumeData {
                VolumeData::$dtype(array)
            }
        }
    };
}

impl_element!(u8, Uint8);
impl_element!(u16, Uint16);
impl_element!(u32, Uint32);
impl_element!(f32, Float32);

/// Trait for associative, commutative binary reductions.
///
/// Folding an axis with [BinaryReduction::combine] starting from [BinaryReduction::identity]
/// gives the same result in any order.
pub trait BinaryReduction {
    /// Name used in log messages.
    const NAME: &'static str;

    /// Identity value of the reduction.
    fn identity<T: Element>() -> T;

    /// Combine an accumulated value with the next element.
    fn combine<T: Element>(acc: T, value: T) -> T;
}

/// Element-wise maximum.
pub struct Max {}

impl BinaryReduction for Max {
    const NAME: &'static str = "max";

    fn identity<T: Element>() -> T {
        T::min_value()
    }

    fn combine<T: Element>(acc: T, value: T) -> T {
        // NaN never compares greater, so it is skipped rather than propagated.
        if value > acc {
            value
        } else {
            acc
        }
    }
}

/// Convert an element to u16, clamping to the u16 range.
///
/// Returns the converted value and whether it had to be clamped. NaN converts to 0 and counts
/// as clamped. Fractional parts are truncated.
pub fn clamp_to_u16<T: Element>(value: T) -> (u16, bool) {
    match value.to_u16() {
        Some(converted) => (converted, false),
        None => match value.to_f64() {
            Some(wide) if wide > f64::from(u16::MAX) => (u16::MAX, true),
            _ => (0, true),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_dtypes() {
        assert_eq!(DType::Uint8, <u8 as Element>::DTYPE);
        assert_eq!(DType::Uint16, <u16 as Element>::DTYPE);
        assert_eq!(DType::Uint32, <u32 as Element>::DTYPE);
        assert_eq!(DType::Float32, <f32 as Element>::DTYPE);
    }

    #[test]
    fn into_volume() {
        let array = ndarray::arr1(&[1_u32, 2, 3]).into_dyn();
        let volume = u32::into_volume(array);
        assert_eq!(DType::Uint32, volume.dtype());
        assert_eq!(&[3], volume.shape());
    }

    #[test]
    fn max_identity_and_combine() {
        assert_eq!(0_u16, Max::identity::<u16>());
        assert_eq!(f32::MIN, Max::identity::<f32>());
        assert_eq!(7_u16, Max::combine(3_u16, 7));
        assert_eq!(7_u16, Max::combine(7_u16, 3));
        assert_eq!(2.5_f32, Max::combine(2.5_f32, f32::NAN));
    }

    #[test]
    fn max_is_order_independent() {
        let values = [5_u32, 1, 9, 9, 0, 4];
        let forward = values.iter().fold(Max::identity(), |acc, v| Max::combine(acc, *v));
        let backward = values
            .iter()
            .rev()
            .fold(Max::identity(), |acc, v| Max::combine(acc, *v));
        assert_eq!(9, forward);
        assert_eq!(forward, backward);
    }

    #[test]
    fn clamp_in_range() {
        assert_eq!((42, false), clamp_to_u16(42_u8));
        assert_eq!((65535, false), clamp_to_u16(65535_u32));
        assert_eq!((3, false), clamp_to_u16(3.7_f32));
    }

    #[test]
    fn clamp_out_of_range() {
        assert_eq!((65535, true), clamp_to_u16(70000_u32));
        assert_eq!((65535, true), clamp_to_u16(1.0e9_f32));
        assert_eq!((0, true), clamp_to_u16(-5.0_f32));
        assert_eq!((0, true), clamp_to_u16(f32::NAN));
    }
}
