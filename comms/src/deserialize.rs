use std::io;

/// Reads a message out of an incoming frame.
pub trait Deserialize<'a>: Sized {
    /// Should parse `buf` into `Self`, borrowing from it wherever possible.
    ///
    /// # Arguments
    /// * `buf` - The frame body, without the length prefix.
    ///
    /// # Returns
    /// The parsed value or an `io::Error` of kind `InvalidData`.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
