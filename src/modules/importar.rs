use std::io::Cursor;

use actix_multipart::Multipart;
use actix_web::{error, Error};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tamaño máximo aceptado para un libro Excel subido por la intranet.
pub const MAX_BYTES_EXCEL: usize = 10 * 1024 * 1024;

/// Los endpoints de importación reciben el año electoral por query string.
#[derive(Deserialize)]
pub struct ParamsImportacion {
    pub anho: i32,
}

pub fn anho_valido(anho: i32) -> bool {
    (2000..=2100).contains(&anho)
}

#[derive(Debug, Error)]
pub enum ErrorImportacion {
    #[error("no se pudo leer el archivo Excel: {0}")]
    Libro(String),
    #[error("el archivo no contiene hojas")]
    SinHojas,
    #[error("la primera hoja no tiene fila de encabezados")]
    SinEncabezados,
    #[error("faltan columnas obligatorias: {}", .0.join(", "))]
    ColumnasFaltantes(Vec<String>),
}

/// Error de una fila concreta del Excel. `fila` es el número tal como se ve
/// en el archivo: los encabezados son la fila 1, los datos empiezan en la 2.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorFila {
    pub fila: usize,
    pub columna: String,
    pub mensaje: String,
}

impl ErrorFila {
    pub fn nuevo(indice: usize, columna: &str, mensaje: impl Into<String>) -> Self {
        ErrorFila {
            fila: indice + 2,
            columna: columna.to_string(),
            mensaje: mensaje.into(),
        }
    }
}

/// Resumen que devuelve todo endpoint de importación. Si `errores` no está
/// vacío no se insertó ninguna fila.
#[derive(Debug, Serialize)]
pub struct ResultadoImportacion {
    pub total: usize,
    pub insertados: usize,
    pub errores: Vec<ErrorFila>,
}

impl ResultadoImportacion {
    pub fn rechazado(total: usize, errores: Vec<ErrorFila>) -> Self {
        ResultadoImportacion {
            total,
            insertados: 0,
            errores,
        }
    }

    pub fn completo(total: usize) -> Self {
        ResultadoImportacion {
            total,
            insertados: total,
            errores: Vec::new(),
        }
    }
}

/// Primera hoja del libro ya separada en encabezados y filas de datos.
pub struct Hoja {
    pub encabezados: Vec<String>,
    pub filas: Vec<Vec<Data>>,
}

pub fn leer_hoja(bytes: &[u8]) -> Result<Hoja, ErrorImportacion> {
    let mut libro = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ErrorImportacion::Libro(e.to_string()))?;
    let nombre = libro
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ErrorImportacion::SinHojas)?;
    let rango = libro
        .worksheet_range(&nombre)
        .map_err(|e| ErrorImportacion::Libro(e.to_string()))?;

    let mut filas = rango.rows();
    let encabezados: Vec<String> = filas
        .next()
        .ok_or(ErrorImportacion::SinEncabezados)?
        .iter()
        .map(|celda| celda_texto(celda).unwrap_or_default())
        .collect();
    if encabezados.iter().all(|e| e.is_empty()) {
        return Err(ErrorImportacion::SinEncabezados);
    }

    Ok(Hoja {
        encabezados,
        filas: filas.map(|fila| fila.to_vec()).collect(),
    })
}

fn normalizar_encabezado(valor: &str) -> String {
    valor
        .trim()
        .to_uppercase()
        .replace([' ', '_', '.'], "")
        .replace('Á', "A")
        .replace('É', "E")
        .replace('Í', "I")
        .replace('Ó', "O")
        .replace('Ú', "U")
        .replace('Ñ', "N")
}

/// Busca una columna por nombre sin distinguir mayúsculas, espacios ni tildes.
pub fn indice_columna(encabezados: &[String], nombre: &str) -> Option<usize> {
    let buscado = normalizar_encabezado(nombre);
    encabezados
        .iter()
        .position(|e| normalizar_encabezado(e) == buscado)
}

/// Resuelve las columnas obligatorias o falla nombrando todas las ausentes.
pub fn indices_obligatorios(
    encabezados: &[String],
    nombres: &[&str],
) -> Result<Vec<usize>, ErrorImportacion> {
    let mut indices = Vec::with_capacity(nombres.len());
    let mut faltantes = Vec::new();
    for nombre in nombres {
        match indice_columna(encabezados, nombre) {
            Some(indice) => indices.push(indice),
            None => faltantes.push(nombre.to_string()),
        }
    }
    if faltantes.is_empty() {
        Ok(indices)
    } else {
        Err(ErrorImportacion::ColumnasFaltantes(faltantes))
    }
}

pub fn celda_texto(celda: &Data) -> Option<String> {
    match celda {
        Data::Empty => None,
        Data::String(valor) => {
            let valor = valor.trim();
            if valor.is_empty() {
                None
            } else {
                Some(valor.to_string())
            }
        }
        Data::Float(valor) => {
            if valor.fract() == 0.0 {
                Some(format!("{}", *valor as i64))
            } else {
                Some(valor.to_string())
            }
        }
        Data::Int(valor) => Some(valor.to_string()),
        Data::Bool(valor) => Some(if *valor { "1".into() } else { "0".into() }),
        _ => None,
    }
}

pub fn celda_entera(celda: &Data) -> Option<i64> {
    match celda {
        Data::Int(valor) => Some(*valor),
        Data::Float(valor) if valor.fract() == 0.0 => Some(*valor as i64),
        Data::String(valor) => valor.trim().parse().ok(),
        _ => None,
    }
}

pub fn valor_texto(fila: &[Data], indice: usize) -> Option<String> {
    fila.get(indice).and_then(celda_texto)
}

pub fn valor_entero(fila: &[Data], indice: usize) -> Option<i64> {
    fila.get(indice).and_then(celda_entera)
}

/// Una fila cuenta como vacía si ninguna celda aporta texto. Las colas de
/// filas en blanco que deja Excel se saltan sin generar errores.
pub fn fila_vacia(fila: &[Data]) -> bool {
    fila.iter().all(|celda| celda_texto(celda).is_none())
}

/// Lee una celda como código de dígitos de longitud fija. Las celdas
/// numéricas pierden los ceros a la izquierda al escribirse en Excel, así
/// que se rellena por la izquierda hasta la longitud esperada.
pub fn valor_codigo(fila: &[Data], indice: usize, longitud: usize) -> Option<String> {
    let valor = valor_texto(fila, indice)?;
    if !valor.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if valor.len() == longitud {
        Some(valor)
    } else if valor.len() < longitud {
        Some(format!("{:0>longitud$}", valor))
    } else {
        None
    }
}

/// Extrae el archivo adjunto del formulario multipart con tope de tamaño.
/// Los campos de texto del formulario (sin filename) se saltan.
/// Devuelve el nombre original y los bytes completos.
pub async fn archivo_de_multipart(
    mut formulario: Multipart,
    max_bytes: usize,
) -> Result<(String, Vec<u8>), Error> {
    while let Some(parte) = formulario.next().await {
        let mut campo =
            parte.map_err(|e| error::ErrorBadRequest(format!("Formulario inválido: {}", e)))?;
        let nombre = match campo.content_disposition().and_then(|cd| cd.get_filename()) {
            Some(nombre) => nombre.to_string(),
            None => continue,
        };

        let mut datos = Vec::new();
        while let Some(trozo) = campo.next().await {
            let trozo =
                trozo.map_err(|e| error::ErrorBadRequest(format!("Lectura interrumpida: {}", e)))?;
            if datos.len() + trozo.len() > max_bytes {
                return Err(error::ErrorPayloadTooLarge(format!(
                    "El archivo supera el máximo de {} bytes",
                    max_bytes
                )));
            }
            datos.extend_from_slice(&trozo);
        }
        if !datos.is_empty() {
            return Ok((nombre, datos));
        }
    }
    Err(error::ErrorBadRequest("No se recibió ningún archivo"))
}

#[cfg(test)]
pub mod pruebas {
    //! Utilidades compartidas por los tests de importación.

    use rust_xlsxwriter::Workbook;

    /// Escribe un libro con una sola hoja en memoria. Cada celda puede ser
    /// texto (`Ok`) o número (`Err`), para cubrir la coerción numérica.
    pub fn libro_xlsx(filas: &[Vec<Result<&str, f64>>]) -> Vec<u8> {
        let mut libro = Workbook::new();
        let hoja = libro.add_worksheet();
        for (f, fila) in filas.iter().enumerate() {
            for (c, celda) in fila.iter().enumerate() {
                match celda {
                    Ok(texto) => hoja.write_string(f as u32, c as u16, *texto).unwrap(),
                    Err(numero) => hoja.write_number(f as u32, c as u16, *numero).unwrap(),
                };
            }
        }
        libro.save_to_buffer().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use actix_web::error::PayloadError;
    use actix_web::http::header::{self, HeaderMap};
    use actix_web::web::Bytes;

    use super::pruebas::libro_xlsx;
    use super::*;

    #[test]
    fn lee_encabezados_y_filas() {
        let bytes = libro_xlsx(&[
            vec![Ok("UBIGEO"), Ok("NOMBRE")],
            vec![Ok("140101"), Ok("IE SAN JOSE")],
            vec![Err(140102.0), Ok("IE SANTA ROSA")],
        ]);
        let hoja = leer_hoja(&bytes).unwrap();
        assert_eq!(hoja.encabezados, vec!["UBIGEO", "NOMBRE"]);
        assert_eq!(hoja.filas.len(), 2);
        assert_eq!(valor_texto(&hoja.filas[0], 1).as_deref(), Some("IE SAN JOSE"));
        // La celda numérica se coerce a su cadena de dígitos.
        assert_eq!(valor_codigo(&hoja.filas[1], 0, 6).as_deref(), Some("140102"));
    }

    #[test]
    fn libro_sin_encabezados_falla() {
        let bytes = libro_xlsx(&[]);
        assert!(matches!(
            leer_hoja(&bytes),
            Err(ErrorImportacion::SinEncabezados)
        ));
    }

    #[test]
    fn bytes_corruptos_fallan() {
        assert!(matches!(
            leer_hoja(b"esto no es un xlsx"),
            Err(ErrorImportacion::Libro(_))
        ));
    }

    #[test]
    fn encuentra_columnas_sin_distinguir_formato() {
        let encabezados = vec![
            "ubigeo ".to_string(),
            "Nombre".to_string(),
            "DIRECCIÓN".to_string(),
        ];
        assert_eq!(indice_columna(&encabezados, "UBIGEO"), Some(0));
        assert_eq!(indice_columna(&encabezados, "DIRECCION"), Some(2));
        assert_eq!(indice_columna(&encabezados, "REFERENCIA"), None);
    }

    #[test]
    fn columnas_faltantes_se_nombran_todas() {
        let encabezados = vec!["NUMERO".to_string()];
        let resultado = indices_obligatorios(&encabezados, &["NUMERO", "UBIGEO", "LOCAL"]);
        match resultado {
            Err(ErrorImportacion::ColumnasFaltantes(faltantes)) => {
                assert_eq!(faltantes, vec!["UBIGEO".to_string(), "LOCAL".to_string()]);
            }
            otro => panic!("se esperaba ColumnasFaltantes, llegó {:?}", otro),
        }
    }

    #[test]
    fn codigo_rellena_ceros_perdidos() {
        let fila = vec![Data::Float(10101.0)];
        assert_eq!(valor_codigo(&fila, 0, 6).as_deref(), Some("010101"));

        let fila = vec![Data::String("140101".into())];
        assert_eq!(valor_codigo(&fila, 0, 6).as_deref(), Some("140101"));

        let fila = vec![Data::String("1401015".into())];
        assert_eq!(valor_codigo(&fila, 0, 6), None);

        let fila = vec![Data::String("14A101".into())];
        assert_eq!(valor_codigo(&fila, 0, 6), None);
    }

    #[test]
    fn error_fila_cuenta_desde_el_excel() {
        let error = ErrorFila::nuevo(0, "DNI", "es obligatorio");
        assert_eq!(error.fila, 2);
    }

    #[test]
    fn fila_sin_texto_es_vacia() {
        assert!(fila_vacia(&[Data::Empty, Data::String("  ".into())]));
        assert!(!fila_vacia(&[Data::Empty, Data::Float(1.0)]));
    }

    fn formulario_de(cuerpo: &'static str) -> Multipart {
        let mut encabezados = HeaderMap::new();
        encabezados.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("multipart/form-data; boundary=limite"),
        );
        let flujo = futures_util::stream::iter([Ok::<Bytes, PayloadError>(Bytes::from_static(
            cuerpo.as_bytes(),
        ))]);
        Multipart::new(&encabezados, flujo)
    }

    #[actix_web::test]
    async fn el_archivo_se_toma_aunque_haya_campos_de_texto_antes() {
        let cuerpo = concat!(
            "--limite\r\n",
            "Content-Disposition: form-data; name=\"anho\"\r\n",
            "\r\n",
            "2026\r\n",
            "--limite\r\n",
            "Content-Disposition: form-data; name=\"archivo\"; filename=\"locales.xlsx\"\r\n",
            "\r\n",
            "contenido\r\n",
            "--limite--\r\n"
        );

        let (nombre, datos) = archivo_de_multipart(formulario_de(cuerpo), 1024)
            .await
            .unwrap();
        assert_eq!(nombre, "locales.xlsx");
        assert_eq!(datos, b"contenido");
    }

    #[actix_web::test]
    async fn formulario_sin_archivo_adjunto_es_error() {
        let cuerpo = concat!(
            "--limite\r\n",
            "Content-Disposition: form-data; name=\"anho\"\r\n",
            "\r\n",
            "2026\r\n",
            "--limite--\r\n"
        );

        let resultado = archivo_de_multipart(formulario_de(cuerpo), 1024).await;
        assert!(resultado.is_err());
    }
}
