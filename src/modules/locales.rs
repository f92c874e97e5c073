use std::collections::HashSet;

use actix_multipart::Multipart;
use actix_web::{error, web, Error, HttpResponse, Responder};
use calamine::Data;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder};

use crate::modules::auditoria;
use crate::modules::importar::{self, ErrorFila, ErrorImportacion, ParamsImportacion, ResultadoImportacion};
use crate::modules::login::Autenticado;
use crate::modules::paginacion::{self, ListaPaginada};
use crate::modules::ubigeo::{IndiceUbigeo, LARGO_DISTRITO};
use crate::structs::AppState;

#[derive(FromRow, Serialize, Debug)]
pub struct Local {
    pub id: i64,
    pub anho: i32,
    pub codigo_ubigeo: String,
    pub nombre: String,
    pub direccion: String,
    pub referencia: Option<String>,
    pub creado_en: DateTime<Utc>,
}

#[derive(FromRow, Serialize, Debug)]
pub struct LocalLista {
    pub id: i64,
    pub anho: i32,
    pub codigo_ubigeo: String,
    pub distrito: String,
    pub nombre: String,
    pub direccion: String,
    pub referencia: Option<String>,
    pub creado_en: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct LocalCreate {
    pub anho: i32,
    pub codigo_ubigeo: String,
    pub nombre: String,
    pub direccion: String,
    pub referencia: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct LocalUpdate {
    pub codigo_ubigeo: Option<String>,
    pub nombre: Option<String>,
    pub direccion: Option<String>,
    pub referencia: Option<String>,
}

#[derive(Deserialize)]
pub struct FiltrosLocales {
    pub pagina: Option<i64>,
    pub limite: Option<i64>,
    pub buscar: Option<String>,
    pub anho: Option<i32>,
    pub ubigeo: Option<String>,
}

fn aplicar_filtros(consulta: &mut QueryBuilder<Postgres>, filtros: &FiltrosLocales) {
    if let Some(anho) = filtros.anho {
        consulta.push(" AND l.anho = ").push_bind(anho);
    }
    if let Some(patron) = paginacion::patron_busqueda(&filtros.buscar) {
        consulta
            .push(" AND (l.nombre ILIKE ")
            .push_bind(patron.clone())
            .push(" OR l.direccion ILIKE ")
            .push_bind(patron)
            .push(")");
    }
    if let Some(prefijo) = paginacion::prefijo_ubigeo(&filtros.ubigeo) {
        consulta.push(" AND l.codigo_ubigeo LIKE ").push_bind(prefijo);
    }
}

pub async fn listar_locales(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    filtros: web::Query<FiltrosLocales>,
) -> impl Responder {
    let pagina = paginacion::pagina(filtros.pagina);
    let limite = paginacion::limite(filtros.limite);

    let mut consulta: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM locales l WHERE 1=1");
    aplicar_filtros(&mut consulta, &filtros);
    let total = match consulta
        .build_query_scalar::<i64>()
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(total) => total,
        Err(e) => {
            log::error!("Error al contar locales: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT l.id, l.anho, l.codigo_ubigeo, d.nombre AS distrito, l.nombre,
                l.direccion, l.referencia, l.creado_en
         FROM locales l JOIN distritos d ON d.codigo = l.codigo_ubigeo WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    consulta
        .push(" ORDER BY l.codigo_ubigeo, l.nombre LIMIT ")
        .push_bind(limite)
        .push(" OFFSET ")
        .push_bind(paginacion::offset(pagina, limite));

    match consulta
        .build_query_as::<LocalLista>()
        .fetch_all(&app_state.pool_pg)
        .await
    {
        Ok(locales) => HttpResponse::Ok().json(ListaPaginada::nueva(locales, total, pagina, limite)),
        Err(e) => {
            log::error!("Error al obtener locales: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn obtener_local(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    match sqlx::query_as::<_, Local>(
        "SELECT id, anho, codigo_ubigeo, nombre, direccion, referencia, creado_en
         FROM locales WHERE id = $1",
    )
    .bind(id.into_inner())
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(local)) => HttpResponse::Ok().json(local),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Local no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al obtener local: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

async fn distrito_existe(app_state: &AppState, codigo: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM distritos WHERE codigo = $1)")
        .bind(codigo)
        .fetch_one(&app_state.pool_pg)
        .await
}

pub async fn crear_local(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    local: web::Json<LocalCreate>,
) -> impl Responder {
    if !importar::anho_valido(local.anho) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Año electoral inválido" }));
    }
    let codigo_ubigeo = local.codigo_ubigeo.trim().to_string();
    let nombre = local.nombre.trim().to_string();
    let direccion = local.direccion.trim().to_string();
    if !crate::modules::ubigeo::es_codigo(&codigo_ubigeo, LARGO_DISTRITO) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El ubigeo debe tener 6 dígitos" }));
    }
    if nombre.is_empty() || direccion.is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Nombre y dirección son obligatorios" }));
    }

    match distrito_existe(&app_state, &codigo_ubigeo).await {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::BadRequest().json(
                serde_json::json!({ "error": format!("El distrito {} no existe", codigo_ubigeo) }),
            )
        }
        Err(e) => {
            log::error!("Error al verificar distrito: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Local>(
        "INSERT INTO locales (anho, codigo_ubigeo, nombre, direccion, referencia)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (anho, codigo_ubigeo, nombre) DO NOTHING
         RETURNING id, anho, codigo_ubigeo, nombre, direccion, referencia, creado_en",
    )
    .bind(local.anho)
    .bind(&codigo_ubigeo)
    .bind(&nombre)
    .bind(&direccion)
    .bind(&local.referencia)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(creado)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "locales",
                Some(creado.id.to_string()),
                auditoria::CREAR,
                serde_json::json!({ "nombre": creado.nombre, "ubigeo": creado.codigo_ubigeo, "anho": creado.anho }),
            )
            .await;
            app_state.notificador.publicar(
                "locales.creado",
                "locales",
                format!("Local {} registrado", creado.nombre),
            );
            HttpResponse::Created().json(creado)
        }
        Ok(None) => HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("El local {} ya existe en el ubigeo {} para el año {}", nombre, codigo_ubigeo, local.anho)
        })),
        Err(e) => {
            log::error!("Error al crear local: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn actualizar_local(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
    cambios: web::Json<LocalUpdate>,
) -> impl Responder {
    let local_id = id.into_inner();

    let actual = match sqlx::query_as::<_, Local>(
        "SELECT id, anho, codigo_ubigeo, nombre, direccion, referencia, creado_en
         FROM locales WHERE id = $1",
    )
    .bind(local_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(local)) => local,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Local no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al buscar local {}: {}", local_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let codigo_ubigeo = match &cambios.codigo_ubigeo {
        Some(codigo) => {
            let codigo = codigo.trim().to_string();
            if !crate::modules::ubigeo::es_codigo(&codigo, LARGO_DISTRITO) {
                return HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "El ubigeo debe tener 6 dígitos" }));
            }
            match distrito_existe(&app_state, &codigo).await {
                Ok(true) => codigo,
                Ok(false) => {
                    return HttpResponse::BadRequest().json(
                        serde_json::json!({ "error": format!("El distrito {} no existe", codigo) }),
                    )
                }
                Err(e) => {
                    log::error!("Error al verificar distrito: {}", e);
                    return HttpResponse::InternalServerError().json(serde_json::json!({
                        "error": "Database error",
                        "details": e.to_string()
                    }));
                }
            }
        }
        None => actual.codigo_ubigeo,
    };
    let nombre = cambios
        .nombre
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.nombre);
    let direccion = cambios
        .direccion
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.direccion);
    let referencia = match &cambios.referencia {
        Some(referencia) => Some(referencia.trim().to_string()),
        None => actual.referencia,
    };

    let duplicado = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM locales
          WHERE anho = $1 AND codigo_ubigeo = $2 AND nombre = $3 AND id <> $4)",
    )
    .bind(actual.anho)
    .bind(&codigo_ubigeo)
    .bind(&nombre)
    .bind(local_id)
    .fetch_one(&app_state.pool_pg)
    .await;
    match duplicado {
        Ok(false) => {}
        Ok(true) => {
            return HttpResponse::Conflict().json(serde_json::json!({
                "error": format!("El local {} ya existe en el ubigeo {} para el año {}", nombre, codigo_ubigeo, actual.anho)
            }))
        }
        Err(e) => {
            log::error!("Error al verificar duplicado de local: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Local>(
        "UPDATE locales SET codigo_ubigeo = $1, nombre = $2, direccion = $3, referencia = $4
         WHERE id = $5
         RETURNING id, anho, codigo_ubigeo, nombre, direccion, referencia, creado_en",
    )
    .bind(&codigo_ubigeo)
    .bind(&nombre)
    .bind(&direccion)
    .bind(&referencia)
    .bind(local_id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(actualizado) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "locales",
                Some(local_id.to_string()),
                auditoria::ACTUALIZAR,
                serde_json::json!({ "nombre": actualizado.nombre, "ubigeo": actualizado.codigo_ubigeo }),
            )
            .await;
            app_state.notificador.publicar(
                "locales.actualizado",
                "locales",
                format!("Local {} actualizado", actualizado.nombre),
            );
            HttpResponse::Ok().json(actualizado)
        }
        Err(e) => {
            log::error!("Error al actualizar local: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn eliminar_local(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    let local_id = id.into_inner();

    let mesas = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM mesas WHERE local_id = $1")
        .bind(local_id)
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(cantidad) => cantidad,
        Err(e) => {
            log::error!("Error al contar mesas del local {}: {}", local_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };
    if mesas > 0 {
        return HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("El local tiene {} mesa(s) asignada(s)", mesas)
        }));
    }

    match sqlx::query("DELETE FROM locales WHERE id = $1")
        .bind(local_id)
        .execute(&app_state.pool_pg)
        .await
    {
        Ok(resultado) if resultado.rows_affected() == 0 => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Local no encontrado" }))
        }
        Ok(_) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "locales",
                Some(local_id.to_string()),
                auditoria::ELIMINAR,
                serde_json::json!({}),
            )
            .await;
            app_state.notificador.publicar(
                "locales.eliminado",
                "locales",
                format!("Local {} eliminado", local_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "mensaje": "Local eliminado" }))
        }
        Err(e) => {
            log::error!("Error al eliminar local: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

struct ColumnasLocales {
    ubigeo: usize,
    nombre: usize,
    direccion: usize,
    referencia: Option<usize>,
}

fn resolver_columnas(encabezados: &[String]) -> Result<ColumnasLocales, ErrorImportacion> {
    let indices = importar::indices_obligatorios(encabezados, &["UBIGEO", "NOMBRE", "DIRECCION"])?;
    Ok(ColumnasLocales {
        ubigeo: indices[0],
        nombre: indices[1],
        direccion: indices[2],
        referencia: importar::indice_columna(encabezados, "REFERENCIA"),
    })
}

#[derive(Debug, PartialEq, Eq)]
struct FilaLocal {
    codigo_ubigeo: String,
    nombre: String,
    direccion: String,
    referencia: Option<String>,
}

/// Primera pasada de la importación: valida todas las filas en memoria y
/// junta todos los errores. No toca la base de datos.
fn validar_filas(
    filas: &[Vec<Data>],
    columnas: &ColumnasLocales,
    indice: &IndiceUbigeo,
    existentes: &HashSet<(String, String)>,
) -> (Vec<FilaLocal>, Vec<ErrorFila>) {
    let mut validas = Vec::new();
    let mut errores = Vec::new();
    let mut vistos: HashSet<(String, String)> = HashSet::new();

    for (i, fila) in filas.iter().enumerate() {
        if importar::fila_vacia(fila) {
            continue;
        }

        let codigo_ubigeo = match importar::valor_codigo(fila, columnas.ubigeo, LARGO_DISTRITO) {
            Some(codigo) => match indice.validar_cadena(&codigo) {
                Ok(()) => Some(codigo),
                Err(mensaje) => {
                    errores.push(ErrorFila::nuevo(i, "UBIGEO", mensaje));
                    None
                }
            },
            None => {
                let mensaje = if importar::valor_texto(fila, columnas.ubigeo).is_none() {
                    "es obligatorio"
                } else {
                    "debe ser un código de 6 dígitos"
                };
                errores.push(ErrorFila::nuevo(i, "UBIGEO", mensaje));
                None
            }
        };

        let nombre = importar::valor_texto(fila, columnas.nombre);
        if nombre.is_none() {
            errores.push(ErrorFila::nuevo(i, "NOMBRE", "es obligatorio"));
        }
        let direccion = importar::valor_texto(fila, columnas.direccion);
        if direccion.is_none() {
            errores.push(ErrorFila::nuevo(i, "DIRECCION", "es obligatoria"));
        }
        let referencia = columnas
            .referencia
            .and_then(|columna| importar::valor_texto(fila, columna));

        let (codigo_ubigeo, nombre, direccion) = match (codigo_ubigeo, nombre, direccion) {
            (Some(u), Some(n), Some(d)) => (u, n, d),
            _ => continue,
        };

        let clave = (codigo_ubigeo.clone(), nombre.clone());
        if existentes.contains(&clave) {
            errores.push(ErrorFila::nuevo(
                i,
                "NOMBRE",
                format!(
                    "el local {} ya está registrado en el ubigeo {} para este año",
                    nombre, codigo_ubigeo
                ),
            ));
            continue;
        }
        if !vistos.insert(clave) {
            errores.push(ErrorFila::nuevo(i, "NOMBRE", "está repetido en el archivo"));
            continue;
        }

        validas.push(FilaLocal {
            codigo_ubigeo,
            nombre,
            direccion,
            referencia,
        });
    }

    (validas, errores)
}

pub async fn importar_locales(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    params: web::Query<ParamsImportacion>,
    formulario: Multipart,
) -> Result<HttpResponse, Error> {
    let anho = params.anho;
    if !importar::anho_valido(anho) {
        return Ok(HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Año electoral inválido" })));
    }

    let (nombre_archivo, bytes) =
        importar::archivo_de_multipart(formulario, importar::MAX_BYTES_EXCEL).await?;
    let hoja = match importar::leer_hoja(&bytes) {
        Ok(hoja) => hoja,
        Err(e) => {
            return Ok(
                HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }))
            )
        }
    };
    let columnas = match resolver_columnas(&hoja.encabezados) {
        Ok(columnas) => columnas,
        Err(e) => {
            return Ok(
                HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }))
            )
        }
    };

    let indice = IndiceUbigeo::cargar(&app_state.pool_pg).await.map_err(|e| {
        log::error!("Error al cargar índice de ubigeo: {}", e);
        error::ErrorInternalServerError("Error consultando ubigeo")
    })?;
    let existentes: HashSet<(String, String)> = sqlx::query_as::<_, (String, String)>(
        "SELECT codigo_ubigeo, nombre FROM locales WHERE anho = $1",
    )
    .bind(anho)
    .fetch_all(&app_state.pool_pg)
    .await
    .map_err(|e| {
        log::error!("Error al cargar locales del año {}: {}", anho, e);
        error::ErrorInternalServerError("Error consultando locales")
    })?
    .into_iter()
    .collect();

    let consideradas = hoja
        .filas
        .iter()
        .filter(|fila| !importar::fila_vacia(fila))
        .count();
    let (validas, errores) = validar_filas(&hoja.filas, &columnas, &indice, &existentes);

    if !errores.is_empty() {
        return Ok(HttpResponse::UnprocessableEntity()
            .json(ResultadoImportacion::rechazado(consideradas, errores)));
    }
    if validas.is_empty() {
        return Ok(HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El archivo no contiene filas de datos" })));
    }

    let mut tx = app_state.pool_pg.begin().await.map_err(|e| {
        log::error!("Error al abrir transacción: {}", e);
        error::ErrorInternalServerError("Error insertando locales")
    })?;
    for lote in validas.chunks(500) {
        let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO locales (anho, codigo_ubigeo, nombre, direccion, referencia) ",
        );
        consulta.push_values(lote, |mut fila_sql, fila| {
            fila_sql
                .push_bind(anho)
                .push_bind(&fila.codigo_ubigeo)
                .push_bind(&fila.nombre)
                .push_bind(&fila.direccion)
                .push_bind(&fila.referencia);
        });
        consulta.build().execute(&mut *tx).await.map_err(|e| {
            log::error!("Error al insertar locales: {}", e);
            error::ErrorInternalServerError("Error insertando locales")
        })?;
    }
    tx.commit().await.map_err(|e| {
        log::error!("Error al confirmar importación de locales: {}", e);
        error::ErrorInternalServerError("Error insertando locales")
    })?;

    auditoria::registrar(
        &app_state.pool_pg,
        aut.login(),
        "locales",
        None,
        auditoria::IMPORTAR,
        serde_json::json!({ "archivo": nombre_archivo, "anho": anho, "insertados": validas.len() }),
    )
    .await;
    app_state.notificador.publicar(
        "locales.importado",
        "locales",
        format!("{} locales importados para el año {}", validas.len(), anho),
    );

    Ok(HttpResponse::Ok().json(ResultadoImportacion::completo(validas.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columnas() -> ColumnasLocales {
        ColumnasLocales {
            ubigeo: 0,
            nombre: 1,
            direccion: 2,
            referencia: Some(3),
        }
    }

    fn fila(celdas: &[&str]) -> Vec<Data> {
        celdas.iter().map(|c| Data::String(c.to_string())).collect()
    }

    #[test]
    fn filas_validas_pasan_completas() {
        let indice = IndiceUbigeo::de_codigos(&["140101", "140102"], &[]);
        let filas = vec![
            fila(&["140101", "IE SAN JOSE", "AV GRAU 123", "FRENTE A LA PLAZA"]),
            fila(&["140102", "IE SANTA ROSA", "CALLE LIMA 45"]),
        ];
        let (validas, errores) = validar_filas(&filas, &columnas(), &indice, &HashSet::new());
        assert!(errores.is_empty());
        assert_eq!(validas.len(), 2);
        assert_eq!(validas[0].referencia.as_deref(), Some("FRENTE A LA PLAZA"));
        assert_eq!(validas[1].referencia, None);
    }

    #[test]
    fn una_fila_puede_juntar_varios_errores() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["", "", ""])];
        let (validas, errores) = validar_filas(&filas, &columnas(), &indice, &HashSet::new());
        assert!(validas.is_empty());
        // La fila vacía se ignora, no produce errores.
        assert!(errores.is_empty());

        let filas = vec![fila(&["abc", "", "AV GRAU"])];
        let (validas, errores) = validar_filas(&filas, &columnas(), &indice, &HashSet::new());
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 2);
        assert_eq!(errores[0].columna, "UBIGEO");
        assert_eq!(errores[1].columna, "NOMBRE");
        assert_eq!(errores[0].fila, 2);
    }

    #[test]
    fn cadena_de_ubigeo_rota_se_reporta() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["149901", "IE SAN JOSE", "AV GRAU"])];
        let (_, errores) = validar_filas(&filas, &columnas(), &indice, &HashSet::new());
        assert_eq!(errores.len(), 1);
        assert!(errores[0].mensaje.contains("provincia 1499"));
    }

    #[test]
    fn duplicado_contra_la_bd_es_error() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let existentes: HashSet<(String, String)> =
            [("140101".to_string(), "IE SAN JOSE".to_string())].into();
        let filas = vec![fila(&["140101", "IE SAN JOSE", "AV GRAU"])];
        let (validas, errores) = validar_filas(&filas, &columnas(), &indice, &existentes);
        assert!(validas.is_empty());
        assert!(errores[0].mensaje.contains("ya está registrado"));
    }

    #[test]
    fn duplicado_dentro_del_archivo_es_error() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![
            fila(&["140101", "IE SAN JOSE", "AV GRAU"]),
            fila(&["140101", "IE SAN JOSE", "OTRA DIRECCION"]),
        ];
        let (validas, errores) = validar_filas(&filas, &columnas(), &indice, &HashSet::new());
        assert_eq!(validas.len(), 1);
        assert_eq!(errores.len(), 1);
        assert_eq!(errores[0].fila, 3);
        assert!(errores[0].mensaje.contains("repetido en el archivo"));
    }

    #[test]
    fn celdas_numericas_de_ubigeo_se_aceptan() {
        let indice = IndiceUbigeo::de_codigos(&["010101"], &[]);
        let filas = vec![vec![
            Data::Float(10101.0),
            Data::String("IE AMAZONAS".into()),
            Data::String("JR UNION 1".into()),
        ]];
        let (validas, errores) = validar_filas(&filas, &columnas(), &indice, &HashSet::new());
        assert!(errores.is_empty());
        assert_eq!(validas[0].codigo_ubigeo, "010101");
    }

    #[test]
    fn columnas_se_resuelven_desde_encabezados_reales() {
        let hoja = importar::leer_hoja(&importar::pruebas::libro_xlsx(&[
            vec![Ok("Ubigeo"), Ok("NOMBRE "), Ok("dirección"), Ok("REFERENCIA")],
            vec![Ok("140101"), Ok("IE SAN JOSE"), Ok("AV GRAU 123"), Ok("")],
        ]))
        .unwrap();
        let columnas = resolver_columnas(&hoja.encabezados).unwrap();
        assert_eq!(columnas.ubigeo, 0);
        assert_eq!(columnas.direccion, 2);
        assert_eq!(columnas.referencia, Some(3));

        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let (validas, errores) =
            validar_filas(&hoja.filas, &columnas, &indice, &HashSet::new());
        assert!(errores.is_empty());
        assert_eq!(validas.len(), 1);
    }
}
