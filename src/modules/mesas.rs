use std::collections::{HashMap, HashSet};

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

pub const LARGO_NUMERO_MESA: usize = 6;

#[derive(FromRow, Serialize, Debug)]
pub struct Mesa {
    pub id: i64,
    pub anho: i32,
    pub numero: String,
    pub local_id: i64,
    pub electores: i32,
    pub creado_en: DateTime<Utc>,
}

#[derive(FromRow, Serialize, Debug)]
pub struct MesaLista {
    pub id: i64,
    pub anho: i32,
    pub numero: String,
    pub local_id: i64,
    pub local_nombre: String,
    pub codigo_ubigeo: String,
    pub electores: i32,
    pub creado_en: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct MesaCreate {
    pub anho: i32,
    pub numero: String,
    pub local_id: i64,
    pub electores: Option<i32>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct MesaUpdate {
    pub numero: Option<String>,
    pub local_id: Option<i64>,
    pub electores: Option<i32>,
}

#[derive(Deserialize)]
pub struct FiltrosMesas {
    pub pagina: Option<i64>,
    pub limite: Option<i64>,
    pub buscar: Option<String>,
    pub anho: Option<i32>,
    pub local_id: Option<i64>,
    pub ubigeo: Option<String>,
}

fn aplicar_filtros(consulta: &mut QueryBuilder<Postgres>, filtros: &FiltrosMesas) {
    if let Some(anho) = filtros.anho {
        consulta.push(" AND m.anho = ").push_bind(anho);
    }
    if let Some(buscar) = filtros.buscar.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        consulta
            .push(" AND m.numero LIKE ")
            .push_bind(format!("{}%", buscar));
    }
    if let Some(local_id) = filtros.local_id {
        consulta.push(" AND m.local_id = ").push_bind(local_id);
    }
    if let Some(prefijo) = paginacion::prefijo_ubigeo(&filtros.ubigeo) {
        consulta.push(" AND l.codigo_ubigeo LIKE ").push_bind(prefijo);
    }
}

pub async fn listar_mesas(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    filtros: web::Query<FiltrosMesas>,
) -> impl Responder {
    let pagina = paginacion::pagina(filtros.pagina);
    let limite = paginacion::limite(filtros.limite);

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT COUNT(*) FROM mesas m JOIN locales l ON l.id = m.local_id WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    let total = match consulta
        .build_query_scalar::<i64>()
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(total) => total,
        Err(e) => {
            log::error!("Error al contar mesas: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT m.id, m.anho, m.numero, m.local_id, l.nombre AS local_nombre,
                l.codigo_ubigeo, m.electores, m.creado_en
         FROM mesas m JOIN locales l ON l.id = m.local_id WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    consulta
        .push(" ORDER BY m.numero LIMIT ")
        .push_bind(limite)
        .push(" OFFSET ")
        .push_bind(paginacion::offset(pagina, limite));

    match consulta
        .build_query_as::<MesaLista>()
        .fetch_all(&app_state.pool_pg)
        .await
    {
        Ok(mesas) => HttpResponse::Ok().json(ListaPaginada::nueva(mesas, total, pagina, limite)),
        Err(e) => {
            log::error!("Error al obtener mesas: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn obtener_mesa(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    match sqlx::query_as::<_, MesaLista>(
        "SELECT m.id, m.anho, m.numero, m.local_id, l.nombre AS local_nombre,
                l.codigo_ubigeo, m.electores, m.creado_en
         FROM mesas m JOIN locales l ON l.id = m.local_id WHERE m.id = $1",
    )
    .bind(id.into_inner())
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(mesa)) => HttpResponse::Ok().json(mesa),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Mesa no encontrada" }))
        }
        Err(e) => {
            log::error!("Error al obtener mesa: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

/// Devuelve el año del local si existe.
async fn anho_del_local(app_state: &AppState, local_id: i64) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT anho FROM locales WHERE id = $1")
        .bind(local_id)
        .fetch_optional(&app_state.pool_pg)
        .await
}

pub async fn crear_mesa(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    mesa: web::Json<MesaCreate>,
) -> impl Responder {
    if !importar::anho_valido(mesa.anho) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Año electoral inválido" }));
    }
    let numero = mesa.numero.trim().to_string();
    if !crate::modules::ubigeo::es_codigo(&numero, LARGO_NUMERO_MESA) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El número de mesa debe tener 6 dígitos" }));
    }
    let electores = mesa.electores.unwrap_or(0);
    if electores < 0 {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El número de electores no puede ser negativo" }));
    }

    match anho_del_local(&app_state, mesa.local_id).await {
        Ok(Some(anho_local)) if anho_local == mesa.anho => {}
        Ok(Some(anho_local)) => {
            return HttpResponse::BadRequest().json(
                serde_json::json!({ "error": format!("El local pertenece al año {}", anho_local) }),
            )
        }
        Ok(None) => {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": "El local no existe" }))
        }
        Err(e) => {
            log::error!("Error al verificar local: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Mesa>(
        "INSERT INTO mesas (anho, numero, local_id, electores)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (anho, numero) DO NOTHING
         RETURNING id, anho, numero, local_id, electores, creado_en",
    )
    .bind(mesa.anho)
    .bind(&numero)
    .bind(mesa.local_id)
    .bind(electores)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(creada)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "mesas",
                Some(creada.id.to_string()),
                auditoria::CREAR,
                serde_json::json!({ "numero": creada.numero, "anho": creada.anho }),
            )
            .await;
            app_state.notificador.publicar(
                "mesas.creado",
                "mesas",
                format!("Mesa {} registrada", creada.numero),
            );
            HttpResponse::Created().json(creada)
        }
        Ok(None) => HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("La mesa {} ya existe para el año {}", numero, mesa.anho)
        })),
        Err(e) => {
            log::error!("Error al crear mesa: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn actualizar_mesa(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
    cambios: web::Json<MesaUpdate>,
) -> impl Responder {
    let mesa_id = id.into_inner();

    let actual = match sqlx::query_as::<_, Mesa>(
        "SELECT id, anho, numero, local_id, electores, creado_en FROM mesas WHERE id = $1",
    )
    .bind(mesa_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(mesa)) => mesa,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Mesa no encontrada" }))
        }
        Err(e) => {
            log::error!("Error al buscar mesa {}: {}", mesa_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let numero = match &cambios.numero {
        Some(numero) => {
            let numero = numero.trim().to_string();
            if !crate::modules::ubigeo::es_codigo(&numero, LARGO_NUMERO_MESA) {
                return HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "El número de mesa debe tener 6 dígitos" }));
            }
            numero
        }
        None => actual.numero,
    };
    let local_id = match cambios.local_id {
        Some(local_id) => {
            match anho_del_local(&app_state, local_id).await {
                Ok(Some(anho_local)) if anho_local == actual.anho => local_id,
                Ok(Some(anho_local)) => {
                    return HttpResponse::BadRequest().json(serde_json::json!({
                        "error": format!("El local pertenece al año {}", anho_local)
                    }))
                }
                Ok(None) => {
                    return HttpResponse::BadRequest()
                        .json(serde_json::json!({ "error": "El local no existe" }))
                }
                Err(e) => {
                    log::error!("Error al verificar local: {}", e);
                    return HttpResponse::InternalServerError().json(serde_json::json!({
                        "error": "Database error",
                        "details": e.to_string()
                    }));
                }
            }
        }
        None => actual.local_id,
    };
    let electores = cambios.electores.unwrap_or(actual.electores);
    if electores < 0 {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El número de electores no puede ser negativo" }));
    }

    let duplicada = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM mesas WHERE anho = $1 AND numero = $2 AND id <> $3)",
    )
    .bind(actual.anho)
    .bind(&numero)
    .bind(mesa_id)
    .fetch_one(&app_state.pool_pg)
    .await;
    match duplicada {
        Ok(false) => {}
        Ok(true) => {
            return HttpResponse::Conflict().json(serde_json::json!({
                "error": format!("La mesa {} ya existe para el año {}", numero, actual.anho)
            }))
        }
        Err(e) => {
            log::error!("Error al verificar duplicado de mesa: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Mesa>(
        "UPDATE mesas SET numero = $1, local_id = $2, electores = $3 WHERE id = $4
         RETURNING id, anho, numero, local_id, electores, creado_en",
    )
    .bind(&numero)
    .bind(local_id)
    .bind(electores)
    .bind(mesa_id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(actualizada) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "mesas",
                Some(mesa_id.to_string()),
                auditoria::ACTUALIZAR,
                serde_json::json!({ "numero": actualizada.numero }),
            )
            .await;
            app_state.notificador.publicar(
                "mesas.actualizado",
                "mesas",
                format!("Mesa {} actualizada", actualizada.numero),
            );
            HttpResponse::Ok().json(actualizada)
        }
        Err(e) => {
            log::error!("Error al actualizar mesa: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn eliminar_mesa(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    let mesa_id = id.into_inner();

    // Los personeros asignados quedan sin mesa (FK con SET NULL).
    match sqlx::query("DELETE FROM mesas WHERE id = $1")
        .bind(mesa_id)
        .execute(&app_state.pool_pg)
        .await
    {
        Ok(resultado) if resultado.rows_affected() == 0 => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Mesa no encontrada" }))
        }
        Ok(_) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "mesas",
                Some(mesa_id.to_string()),
                auditoria::ELIMINAR,
                serde_json::json!({}),
            )
            .await;
            app_state.notificador.publicar(
                "mesas.eliminado",
                "mesas",
                format!("Mesa {} eliminada", mesa_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "mensaje": "Mesa eliminada" }))
        }
        Err(e) => {
            log::error!("Error al eliminar mesa: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

struct ColumnasMesas {
    numero: usize,
    ubigeo: usize,
    local: usize,
    electores: Option<usize>,
}

fn resolver_columnas(encabezados: &[String]) -> Result<ColumnasMesas, ErrorImportacion> {
    let indices = importar::indices_obligatorios(encabezados, &["NUMERO", "UBIGEO", "LOCAL"])?;
    Ok(ColumnasMesas {
        numero: indices[0],
        ubigeo: indices[1],
        local: indices[2],
        electores: importar::indice_columna(encabezados, "ELECTORES"),
    })
}

/// Los nombres de local del Excel se comparan sin distinguir mayúsculas
/// ni espacios de borde contra los registrados para el año.
pub fn clave_local(codigo_ubigeo: &str, nombre: &str) -> (String, String) {
    (codigo_ubigeo.to_string(), nombre.trim().to_uppercase())
}

/// Agrupa los locales de un año por clave normalizada. La base permite dos
/// locales del mismo ubigeo cuyos nombres solo difieren en mayúsculas; si
/// ambos caen en la misma clave el valor queda en `None` y las filas que
/// los nombren se rechazan como ambiguas en vez de resolverse al azar.
pub fn mapa_de_locales(
    filas: Vec<(i64, String, String)>,
) -> HashMap<(String, String), Option<i64>> {
    let mut mapa: HashMap<(String, String), Option<i64>> = HashMap::new();
    for (id, codigo, nombre) in filas {
        mapa.entry(clave_local(&codigo, &nombre))
            .and_modify(|valor| *valor = None)
            .or_insert(Some(id));
    }
    mapa
}

#[derive(Debug, PartialEq, Eq)]
struct FilaMesa {
    numero: String,
    local_id: i64,
    electores: i32,
}

fn validar_filas(
    filas: &[Vec<Data>],
    columnas: &ColumnasMesas,
    indice: &IndiceUbigeo,
    locales: &HashMap<(String, String), Option<i64>>,
    existentes: &HashSet<String>,
) -> (Vec<FilaMesa>, Vec<ErrorFila>) {
    let mut validas = Vec::new();
    let mut errores = Vec::new();
    let mut vistos: HashSet<String> = HashSet::new();

    for (i, fila) in filas.iter().enumerate() {
        if importar::fila_vacia(fila) {
            continue;
        }

        let numero = match importar::valor_codigo(fila, columnas.numero, LARGO_NUMERO_MESA) {
            Some(numero) => Some(numero),
            None => {
                let mensaje = if importar::valor_texto(fila, columnas.numero).is_none() {
                    "es obligatorio"
                } else {
                    "debe ser un número de 6 dígitos"
                };
                errores.push(ErrorFila::nuevo(i, "NUMERO", mensaje));
                None
            }
        };

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

        let nombre_local = importar::valor_texto(fila, columnas.local);
        if nombre_local.is_none() {
            errores.push(ErrorFila::nuevo(i, "LOCAL", "es obligatorio"));
        }

        let mut electores = Some(0);
        if let Some(columna) = columnas.electores {
            if importar::valor_texto(fila, columna).is_some() {
                match importar::valor_entero(fila, columna) {
                    Some(valor) if (0..=i32::MAX as i64).contains(&valor) => {
                        electores = Some(valor as i32)
                    }
                    _ => {
                        errores.push(ErrorFila::nuevo(
                            i,
                            "ELECTORES",
                            "debe ser un número entero no negativo",
                        ));
                        electores = None;
                    }
                }
            }
        }

        let (numero, codigo_ubigeo, nombre_local, electores) =
            match (numero, codigo_ubigeo, nombre_local, electores) {
                (Some(n), Some(u), Some(l), Some(e)) => (n, u, l, e),
                _ => continue,
            };

        let local_id = match locales.get(&clave_local(&codigo_ubigeo, &nombre_local)) {
            Some(Some(local_id)) => *local_id,
            Some(None) => {
                errores.push(ErrorFila::nuevo(
                    i,
                    "LOCAL",
                    format!(
                        "hay más de un local llamado {} en el ubigeo {} para este año",
                        nombre_local, codigo_ubigeo
                    ),
                ));
                continue;
            }
            None => {
                errores.push(ErrorFila::nuevo(
                    i,
                    "LOCAL",
                    format!(
                        "el local {} no está registrado en el ubigeo {} para este año",
                        nombre_local, codigo_ubigeo
                    ),
                ));
                continue;
            }
        };

        if existentes.contains(&numero) {
            errores.push(ErrorFila::nuevo(
                i,
                "NUMERO",
                format!("la mesa {} ya está registrada para este año", numero),
            ));
            continue;
        }
        if !vistos.insert(numero.clone()) {
            errores.push(ErrorFila::nuevo(i, "NUMERO", "está repetido en el archivo"));
            continue;
        }

        validas.push(FilaMesa {
            numero,
            local_id,
            electores,
        });
    }

    (validas, errores)
}

pub async fn importar_mesas(
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
    let locales = mapa_de_locales(
        sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, codigo_ubigeo, nombre FROM locales WHERE anho = $1",
        )
        .bind(anho)
        .fetch_all(&app_state.pool_pg)
        .await
        .map_err(|e| {
            log::error!("Error al cargar locales del año {}: {}", anho, e);
            error::ErrorInternalServerError("Error consultando locales")
        })?,
    );
    let existentes: HashSet<String> =
        sqlx::query_scalar::<_, String>("SELECT numero FROM mesas WHERE anho = $1")
            .bind(anho)
            .fetch_all(&app_state.pool_pg)
            .await
            .map_err(|e| {
                log::error!("Error al cargar mesas del año {}: {}", anho, e);
                error::ErrorInternalServerError("Error consultando mesas")
            })?
            .into_iter()
            .collect();

    let consideradas = hoja
        .filas
        .iter()
        .filter(|fila| !importar::fila_vacia(fila))
        .count();
    let (validas, errores) = validar_filas(&hoja.filas, &columnas, &indice, &locales, &existentes);

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
        error::ErrorInternalServerError("Error insertando mesas")
    })?;
    for lote in validas.chunks(500) {
        let mut consulta: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO mesas (anho, numero, local_id, electores) ");
        consulta.push_values(lote, |mut fila_sql, fila| {
            fila_sql
                .push_bind(anho)
                .push_bind(&fila.numero)
                .push_bind(fila.local_id)
                .push_bind(fila.electores);
        });
        consulta.build().execute(&mut *tx).await.map_err(|e| {
            log::error!("Error al insertar mesas: {}", e);
            error::ErrorInternalServerError("Error insertando mesas")
        })?;
    }
    tx.commit().await.map_err(|e| {
        log::error!("Error al confirmar importación de mesas: {}", e);
        error::ErrorInternalServerError("Error insertando mesas")
    })?;

    auditoria::registrar(
        &app_state.pool_pg,
        aut.login(),
        "mesas",
        None,
        auditoria::IMPORTAR,
        serde_json::json!({ "archivo": nombre_archivo, "anho": anho, "insertados": validas.len() }),
    )
    .await;
    app_state.notificador.publicar(
        "mesas.importado",
        "mesas",
        format!("{} mesas importadas para el año {}", validas.len(), anho),
    );

    Ok(HttpResponse::Ok().json(ResultadoImportacion::completo(validas.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columnas() -> ColumnasMesas {
        ColumnasMesas {
            numero: 0,
            ubigeo: 1,
            local: 2,
            electores: Some(3),
        }
    }

    fn fila(celdas: &[&str]) -> Vec<Data> {
        celdas.iter().map(|c| Data::String(c.to_string())).collect()
    }

    fn locales_de_prueba() -> HashMap<(String, String), Option<i64>> {
        mapa_de_locales(vec![
            (1, "140101".into(), "IE SAN JOSE".into()),
            (2, "140102".into(), "IE SANTA ROSA".into()),
        ])
    }

    #[test]
    fn filas_validas_resuelven_su_local() {
        let indice = IndiceUbigeo::de_codigos(&["140101", "140102"], &[]);
        let filas = vec![
            fila(&["030101", "140101", "IE SAN JOSE", "250"]),
            // El nombre del local no distingue mayúsculas.
            fila(&["030102", "140102", "ie santa rosa", ""]),
        ];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales_de_prueba(), &HashSet::new());
        assert!(errores.is_empty());
        assert_eq!(validas.len(), 2);
        assert_eq!(validas[0].local_id, 1);
        assert_eq!(validas[0].electores, 250);
        assert_eq!(validas[1].local_id, 2);
        assert_eq!(validas[1].electores, 0);
    }

    #[test]
    fn numero_de_celda_numerica_recupera_ceros() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![vec![
            Data::Float(30101.0),
            Data::String("140101".into()),
            Data::String("IE SAN JOSE".into()),
        ]];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales_de_prueba(), &HashSet::new());
        assert!(errores.is_empty());
        assert_eq!(validas[0].numero, "030101");
    }

    #[test]
    fn local_desconocido_es_error() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["030101", "140101", "IE INEXISTENTE", ""])];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales_de_prueba(), &HashSet::new());
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 1);
        assert_eq!(errores[0].columna, "LOCAL");
        assert!(errores[0].mensaje.contains("IE INEXISTENTE"));
    }

    #[test]
    fn local_con_nombre_ambiguo_se_rechaza() {
        // Dos locales del mismo ubigeo que solo difieren en mayúsculas.
        let locales = mapa_de_locales(vec![
            (1, "140101".into(), "IE San Jose".into()),
            (2, "140101".into(), "IE SAN JOSE".into()),
            (3, "140101".into(), "IE LAS PALMAS".into()),
        ]);
        assert_eq!(locales.get(&clave_local("140101", "IE SAN JOSE")), Some(&None));
        assert_eq!(locales.get(&clave_local("140101", "IE LAS PALMAS")), Some(&Some(3)));

        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["030101", "140101", "ie san jose", ""])];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales, &HashSet::new());
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 1);
        assert_eq!(errores[0].columna, "LOCAL");
        assert!(errores[0].mensaje.contains("más de un local"));
    }

    #[test]
    fn electores_invalidos_son_error() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![
            fila(&["030101", "140101", "IE SAN JOSE", "doscientos"]),
            fila(&["030102", "140101", "IE SAN JOSE", "-5"]),
        ];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales_de_prueba(), &HashSet::new());
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 2);
        assert!(errores.iter().all(|e| e.columna == "ELECTORES"));
    }

    #[test]
    fn mesa_repetida_en_bd_o_archivo_es_error() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let existentes: HashSet<String> = ["030100".to_string()].into();
        let filas = vec![
            fila(&["030100", "140101", "IE SAN JOSE", ""]),
            fila(&["030101", "140101", "IE SAN JOSE", ""]),
            fila(&["030101", "140101", "IE SAN JOSE", ""]),
        ];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales_de_prueba(), &existentes);
        assert_eq!(validas.len(), 1);
        assert_eq!(errores.len(), 2);
        assert!(errores[0].mensaje.contains("ya está registrada"));
        assert!(errores[1].mensaje.contains("repetido en el archivo"));
    }

    #[test]
    fn fila_sin_numero_y_sin_local_junta_ambos_errores() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["", "140101", "", "10"])];
        let (validas, errores) =
            validar_filas(&filas, &columnas(), &indice, &locales_de_prueba(), &HashSet::new());
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 2);
        assert_eq!(errores[0].columna, "NUMERO");
        assert_eq!(errores[1].columna, "LOCAL");
    }
}
