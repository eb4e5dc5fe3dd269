//! Constantes compartidas del core.

/// Versión del formato de cache; entra en cada hash de comando y en el
/// chequeo de versión de la base de datos al inicio del build.
pub const EXPECTED_VERSION: u32 = 4;

/// Nombre del archivo de versión dentro del directorio de base de datos.
pub const VERSION_FILE_NAME: &str = "version";
