//! Hashing del core: ids de contenido y serializador de parámetros.

pub mod hash;
pub mod serializer;

pub use hash::{hash_bytes, hash_file, hash_value};
pub use serializer::HashSerializer;
