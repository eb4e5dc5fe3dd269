//! Vista transaccional de contenido durante un run.

use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{ObjectId, ObjectUrl, UrlType};
use crate::store::IndexMap;

/// Capa de resolución url → id para un run en curso.
///
/// Las lecturas atraviesan dos capas: primero los outputs ya registrados por
/// steps terminados de este run (aún no persistidos), después el índice
/// durable del build anterior. Nada toca el índice hasta que el run termina
/// bien: `merge_into_index` vuelca de una vez las entradas durables
/// (`ContentLink`), de modo que un run fallido deja el índice intacto.
pub struct BuildTransaction {
    index: Arc<dyn IndexMap>,
    in_flight: DashMap<ObjectUrl, ObjectId>,
}

impl BuildTransaction {
    pub fn new(index: Arc<dyn IndexMap>) -> Self {
        Self { index, in_flight: DashMap::new() }
    }

    /// Registra un output de un step terminado; visible de inmediato para
    /// el resto del run.
    pub fn record(&self, url: ObjectUrl, id: ObjectId) {
        self.in_flight.insert(url, id);
    }

    /// Resuelve una url: outputs del run → índice durable.
    pub fn try_get(&self, url: &ObjectUrl) -> Option<ObjectId> {
        if let Some(id) = self.in_flight.get(url) {
            return Some(*id);
        }
        match url.url_type {
            UrlType::File => None,
            _ => self.index.get(&url.path),
        }
    }

    /// Vuelca al índice las entradas durables del run. Sólo `ContentLink`
    /// sobrevive entre builds; el resto del contenido es transitorio.
    pub fn merge_into_index(&self) {
        for entry in self.in_flight.iter() {
            if entry.key().url_type == UrlType::ContentLink {
                self.index.set(&entry.key().path, *entry.value());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryIndexMap;

    #[test]
    fn in_flight_outputs_shadow_the_index() {
        let index = Arc::new(InMemoryIndexMap::new());
        index.set("asset", ObjectId::new(b"old"));

        let tx = BuildTransaction::new(index.clone());
        let url = ObjectUrl::content_link("asset");
        assert_eq!(tx.try_get(&url), Some(ObjectId::new(b"old")));

        tx.record(url.clone(), ObjectId::new(b"new"));
        assert_eq!(tx.try_get(&url), Some(ObjectId::new(b"new")));
        // El índice no cambia hasta el merge final
        assert_eq!(index.get("asset"), Some(ObjectId::new(b"old")));

        tx.merge_into_index();
        assert_eq!(index.get("asset"), Some(ObjectId::new(b"new")));
    }

    #[test]
    fn only_content_links_reach_the_index() {
        let index = Arc::new(InMemoryIndexMap::new());
        let tx = BuildTransaction::new(index.clone());
        tx.record(ObjectUrl::content("ephemeral"), ObjectId::new(b"a"));
        tx.record(ObjectUrl::virtual_("scratch"), ObjectId::new(b"b"));
        tx.record(ObjectUrl::content_link("durable"), ObjectId::new(b"c"));

        tx.merge_into_index();
        assert_eq!(index.entries().len(), 1);
        assert_eq!(index.get("durable"), Some(ObjectId::new(b"c")));
    }
}
