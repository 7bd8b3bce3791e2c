use std::io::{Read, Seek, Write};

/// Trait for a readable and seekable stream.
pub trait ReadSeek: Read + Seek + Send {}
impl<R: Read + Seek + Send + ?Sized> ReadSeek for R {}

/// Trait for a writable and seekable stream.
pub trait WriteSeek: Write + Seek + Send {}
impl<W: Write + Seek + Send + ?Sized> WriteSeek for W {}

/// Trait for an object which can be read from a stream.
pub trait ReadFrom<R: Read + ?Sized>: Sized {
    /// The error type returned from `read_from()`.
    type Error;

    /// Reads an instance of this object from `reader`.
    fn read_from(reader: &mut R) -> Result<Self, Self::Error>;
}

/// Trait for an object which can be written to a stream.
pub trait WriteTo<W: Write + ?Sized>: Sized {
    /// The error type returned from `write_to()`.
    type Error;

    /// Writes this object to `writer`.
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error>;
}

/// Extension for `Read` to read a value whose type implements `ReadFrom`.
pub trait ReadStructExt: Read {
    fn read_struct<T: ReadFrom<Self>>(&mut self) -> Result<T, T::Error> {
        T::read_from(self)
    }
}

impl<R: Read + ?Sized> ReadStructExt for R {}

/// Extension for `Write` to write a value whose type implements `WriteTo`.
pub trait WriteStructExt: Write {
    fn write_struct<T: WriteTo<Self>>(&mut self, value: &T) -> Result<(), T::Error> {
        value.write_to(self)
    }
}

impl<W: Write + ?Sized> WriteStructExt for W {}
