use std::fmt;

use serde::{Deserialize, Serialize};

/// Tipo de ubicación de un objeto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UrlType {
    /// Ruta plana en el filesystem.
    File,
    /// Referencia simbólica de contenido entre build steps.
    Content,
    /// Entrada durable del content store (se vuelca al índice al final del build).
    ContentLink,
    /// Entrada transitoria/virtual del content store.
    Virtual,
}

/// Dirección de un objeto: (tipo, ruta). La igualdad considera ambos campos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectUrl {
    pub url_type: UrlType,
    pub path: String,
}

impl ObjectUrl {
    pub fn new(url_type: UrlType, path: impl Into<String>) -> Self {
        Self { url_type, path: path.into() }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(UrlType::File, path)
    }

    pub fn content(path: impl Into<String>) -> Self {
        Self::new(UrlType::Content, path)
    }

    pub fn content_link(path: impl Into<String>) -> Self {
        Self::new(UrlType::ContentLink, path)
    }

    pub fn virtual_(path: impl Into<String>) -> Self {
        Self::new(UrlType::Virtual, path)
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.url_type {
            UrlType::File => "file",
            UrlType::Content => "content",
            UrlType::ContentLink => "link",
            UrlType::Virtual => "virtual",
        };
        write!(f, "{}:{}", prefix, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_considers_both_fields() {
        assert_ne!(ObjectUrl::file("a"), ObjectUrl::content("a"));
        assert_eq!(ObjectUrl::content("a"), ObjectUrl::content("a"));
    }
}
