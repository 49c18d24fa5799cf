/// Plain number types that can back a receive buffer.
pub trait Align1: bytemuck::Pod {}

/// Receive buffers whose element alignment is at least 4 bytes, so an `f32` body
/// placed after the 4 byte header can be viewed in place.
pub trait Align4: Align1 {}

macro_rules! impl_align {
    ($tr:ident: $($ty:ty),+) => {
        $(impl $tr for $ty {})+
    };
}

impl_align!(Align1: u8, u16, u32, u64, i32, i64, f32, f64);
impl_align!(Align4: u32, u64, i32, i64, f32, f64);
