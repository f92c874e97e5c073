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
use crate::modules::mesas::{clave_local, mapa_de_locales, LARGO_NUMERO_MESA};
use crate::modules::paginacion::{self, ListaPaginada};
use crate::modules::ubigeo::{es_codigo, IndiceUbigeo, LARGO_DISTRITO, LARGO_PROVINCIA};
use crate::structs::AppState;

/// Tipos de personero según el ámbito que cubren. El tipo decide qué
/// asignación lleva la fila: mesa, local o un código de ubigeo.
pub const TIPOS: [&str; 4] = ["MESA", "LOCAL", "DISTRITO", "PROVINCIA"];

pub fn tipo_valido(tipo: &str) -> bool {
    TIPOS.contains(&tipo)
}

fn mensaje_tipo(valor: &str) -> String {
    format!(
        "tipo {} no reconocido. Valores permitidos: {}",
        valor,
        TIPOS.join(", ")
    )
}

#[derive(FromRow, Serialize, Debug)]
pub struct Personero {
    pub id: i64,
    pub anho: i32,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub celular: Option<String>,
    pub tipo: String,
    pub mesa_id: Option<i64>,
    pub local_id: Option<i64>,
    pub codigo_ubigeo: Option<String>,
    pub creado_en: DateTime<Utc>,
}

#[derive(FromRow, Serialize, Debug)]
pub struct PersoneroLista {
    pub id: i64,
    pub anho: i32,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub celular: Option<String>,
    pub tipo: String,
    pub mesa_id: Option<i64>,
    pub mesa_numero: Option<String>,
    pub local_id: Option<i64>,
    pub local_nombre: Option<String>,
    pub codigo_ubigeo: Option<String>,
    pub creado_en: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct PersoneroCreate {
    pub anho: i32,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub celular: Option<String>,
    pub tipo: String,
    pub mesa_id: Option<i64>,
    pub local_id: Option<i64>,
    pub codigo_ubigeo: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct PersoneroUpdate {
    pub nombres: Option<String>,
    pub apellidos: Option<String>,
    pub celular: Option<String>,
    pub tipo: Option<String>,
    pub mesa_id: Option<i64>,
    pub local_id: Option<i64>,
    pub codigo_ubigeo: Option<String>,
}

#[derive(Deserialize)]
pub struct FiltrosPersoneros {
    pub pagina: Option<i64>,
    pub limite: Option<i64>,
    pub buscar: Option<String>,
    pub anho: Option<i32>,
    pub tipo: Option<String>,
}

fn aplicar_filtros(consulta: &mut QueryBuilder<Postgres>, filtros: &FiltrosPersoneros) {
    if let Some(anho) = filtros.anho {
        consulta.push(" AND p.anho = ").push_bind(anho);
    }
    if let Some(tipo) = filtros.tipo.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        consulta.push(" AND p.tipo = ").push_bind(tipo.to_uppercase());
    }
    if let Some(patron) = paginacion::patron_busqueda(&filtros.buscar) {
        consulta
            .push(" AND (p.dni ILIKE ")
            .push_bind(patron.clone())
            .push(" OR p.nombres ILIKE ")
            .push_bind(patron.clone())
            .push(" OR p.apellidos ILIKE ")
            .push_bind(patron)
            .push(")");
    }
}

pub async fn listar_personeros(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    filtros: web::Query<FiltrosPersoneros>,
) -> impl Responder {
    let pagina = paginacion::pagina(filtros.pagina);
    let limite = paginacion::limite(filtros.limite);

    let mut consulta: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM personeros p WHERE 1=1");
    aplicar_filtros(&mut consulta, &filtros);
    let total = match consulta
        .build_query_scalar::<i64>()
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(total) => total,
        Err(e) => {
            log::error!("Error al contar personeros: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT p.id, p.anho, p.dni, p.nombres, p.apellidos, p.celular, p.tipo,
                p.mesa_id, m.numero AS mesa_numero, p.local_id, l.nombre AS local_nombre,
                p.codigo_ubigeo, p.creado_en
         FROM personeros p
         LEFT JOIN mesas m ON m.id = p.mesa_id
         LEFT JOIN locales l ON l.id = p.local_id
         WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    consulta
        .push(" ORDER BY p.apellidos, p.nombres LIMIT ")
        .push_bind(limite)
        .push(" OFFSET ")
        .push_bind(paginacion::offset(pagina, limite));

    match consulta
        .build_query_as::<PersoneroLista>()
        .fetch_all(&app_state.pool_pg)
        .await
    {
        Ok(personeros) => {
            HttpResponse::Ok().json(ListaPaginada::nueva(personeros, total, pagina, limite))
        }
        Err(e) => {
            log::error!("Error al obtener personeros: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn obtener_personero(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    match sqlx::query_as::<_, PersoneroLista>(
        "SELECT p.id, p.anho, p.dni, p.nombres, p.apellidos, p.celular, p.tipo,
                p.mesa_id, m.numero AS mesa_numero, p.local_id, l.nombre AS local_nombre,
                p.codigo_ubigeo, p.creado_en
         FROM personeros p
         LEFT JOIN mesas m ON m.id = p.mesa_id
         LEFT JOIN locales l ON l.id = p.local_id
         WHERE p.id = $1",
    )
    .bind(id.into_inner())
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(personero)) => HttpResponse::Ok().json(personero),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Personero no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al obtener personero: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

/// Asignación ya validada contra el padrón del año: solo el campo que
/// corresponde al tipo queda con valor.
struct Asignacion {
    mesa_id: Option<i64>,
    local_id: Option<i64>,
    codigo_ubigeo: Option<String>,
}

/// Valida la asignación de un personero según su tipo. Devuelve la
/// respuesta HTTP de error lista para retornar cuando algo no cuadra.
async fn validar_asignacion(
    app_state: &AppState,
    anho: i32,
    tipo: &str,
    mesa_id: Option<i64>,
    local_id: Option<i64>,
    codigo_ubigeo: Option<&str>,
) -> Result<Asignacion, HttpResponse> {
    match tipo {
        "MESA" => {
            let mesa_id = mesa_id.ok_or_else(|| {
                HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "El tipo MESA requiere mesa_id" }))
            })?;
            let existe = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM mesas WHERE id = $1 AND anho = $2)",
            )
            .bind(mesa_id)
            .bind(anho)
            .fetch_one(&app_state.pool_pg)
            .await
            .map_err(|e| {
                log::error!("Error al verificar mesa: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Database error",
                    "details": e.to_string()
                }))
            })?;
            if !existe {
                return Err(HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "La mesa no existe para ese año" })));
            }
            Ok(Asignacion {
                mesa_id: Some(mesa_id),
                local_id: None,
                codigo_ubigeo: None,
            })
        }
        "LOCAL" => {
            let local_id = local_id.ok_or_else(|| {
                HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "El tipo LOCAL requiere local_id" }))
            })?;
            let existe = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM locales WHERE id = $1 AND anho = $2)",
            )
            .bind(local_id)
            .bind(anho)
            .fetch_one(&app_state.pool_pg)
            .await
            .map_err(|e| {
                log::error!("Error al verificar local: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Database error",
                    "details": e.to_string()
                }))
            })?;
            if !existe {
                return Err(HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "El local no existe para ese año" })));
            }
            Ok(Asignacion {
                mesa_id: None,
                local_id: Some(local_id),
                codigo_ubigeo: None,
            })
        }
        "DISTRITO" | "PROVINCIA" => {
            let (largo, tabla, articulo) = if tipo == "DISTRITO" {
                (LARGO_DISTRITO, "distritos", "El distrito")
            } else {
                (LARGO_PROVINCIA, "provincias", "La provincia")
            };
            let codigo = codigo_ubigeo.map(str::trim).filter(|c| !c.is_empty()).ok_or_else(|| {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("El tipo {} requiere codigo_ubigeo", tipo)
                }))
            })?;
            if !es_codigo(codigo, largo) {
                return Err(HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("El código para el tipo {} debe tener {} dígitos", tipo, largo)
                })));
            }
            let existe = sqlx::query_scalar::<_, bool>(&format!(
                "SELECT EXISTS (SELECT 1 FROM {} WHERE codigo = $1)",
                tabla
            ))
            .bind(codigo)
            .fetch_one(&app_state.pool_pg)
            .await
            .map_err(|e| {
                log::error!("Error al verificar ubigeo: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Database error",
                    "details": e.to_string()
                }))
            })?;
            if !existe {
                return Err(HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("{} {} no existe", articulo, codigo)
                })));
            }
            Ok(Asignacion {
                mesa_id: None,
                local_id: None,
                codigo_ubigeo: Some(codigo.to_string()),
            })
        }
        otro => Err(HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": mensaje_tipo(otro) }))),
    }
}

pub async fn crear_personero(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    personero: web::Json<PersoneroCreate>,
) -> impl Responder {
    if !importar::anho_valido(personero.anho) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Año electoral inválido" }));
    }
    let dni = personero.dni.trim().to_string();
    if !es_codigo(&dni, 8) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El DNI debe tener 8 dígitos" }));
    }
    let nombres = personero.nombres.trim().to_string();
    let apellidos = personero.apellidos.trim().to_string();
    if nombres.is_empty() || apellidos.is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Nombres y apellidos son obligatorios" }));
    }
    let tipo = personero.tipo.trim().to_uppercase();

    let asignacion = match validar_asignacion(
        &app_state,
        personero.anho,
        &tipo,
        personero.mesa_id,
        personero.local_id,
        personero.codigo_ubigeo.as_deref(),
    )
    .await
    {
        Ok(asignacion) => asignacion,
        Err(respuesta) => return respuesta,
    };

    match sqlx::query_as::<_, Personero>(
        "INSERT INTO personeros (anho, dni, nombres, apellidos, celular, tipo, mesa_id, local_id, codigo_ubigeo)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (anho, dni) DO NOTHING
         RETURNING id, anho, dni, nombres, apellidos, celular, tipo, mesa_id, local_id, codigo_ubigeo, creado_en",
    )
    .bind(personero.anho)
    .bind(&dni)
    .bind(&nombres)
    .bind(&apellidos)
    .bind(&personero.celular)
    .bind(&tipo)
    .bind(asignacion.mesa_id)
    .bind(asignacion.local_id)
    .bind(&asignacion.codigo_ubigeo)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(creado)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "personeros",
                Some(creado.id.to_string()),
                auditoria::CREAR,
                serde_json::json!({ "dni": creado.dni, "tipo": creado.tipo, "anho": creado.anho }),
            )
            .await;
            app_state.notificador.publicar(
                "personeros.creado",
                "personeros",
                format!("Personero {} {} registrado", creado.nombres, creado.apellidos),
            );
            HttpResponse::Created().json(creado)
        }
        Ok(None) => HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("El personero con DNI {} ya existe para el año {}", dni, personero.anho)
        })),
        Err(e) => {
            log::error!("Error al crear personero: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn actualizar_personero(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
    cambios: web::Json<PersoneroUpdate>,
) -> impl Responder {
    let personero_id = id.into_inner();

    let actual = match sqlx::query_as::<_, Personero>(
        "SELECT id, anho, dni, nombres, apellidos, celular, tipo, mesa_id, local_id, codigo_ubigeo, creado_en
         FROM personeros WHERE id = $1",
    )
    .bind(personero_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(personero)) => personero,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Personero no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al buscar personero {}: {}", personero_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let nombres = cambios
        .nombres
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.nombres);
    let apellidos = cambios
        .apellidos
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.apellidos);
    let celular = match &cambios.celular {
        Some(celular) => Some(celular.trim().to_string()),
        None => actual.celular,
    };
    let tipo = match &cambios.tipo {
        Some(tipo) => tipo.trim().to_uppercase(),
        None => actual.tipo,
    };

    // La asignación resultante se valida completa: lo enviado pisa lo
    // guardado y el tipo decide qué campo debe quedar con valor.
    let asignacion = match validar_asignacion(
        &app_state,
        actual.anho,
        &tipo,
        cambios.mesa_id.or(actual.mesa_id),
        cambios.local_id.or(actual.local_id),
        cambios.codigo_ubigeo.as_deref().or(actual.codigo_ubigeo.as_deref()),
    )
    .await
    {
        Ok(asignacion) => asignacion,
        Err(respuesta) => return respuesta,
    };

    match sqlx::query_as::<_, Personero>(
        "UPDATE personeros
         SET nombres = $1, apellidos = $2, celular = $3, tipo = $4,
             mesa_id = $5, local_id = $6, codigo_ubigeo = $7
         WHERE id = $8
         RETURNING id, anho, dni, nombres, apellidos, celular, tipo, mesa_id, local_id, codigo_ubigeo, creado_en",
    )
    .bind(&nombres)
    .bind(&apellidos)
    .bind(&celular)
    .bind(&tipo)
    .bind(asignacion.mesa_id)
    .bind(asignacion.local_id)
    .bind(&asignacion.codigo_ubigeo)
    .bind(personero_id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(actualizado) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "personeros",
                Some(personero_id.to_string()),
                auditoria::ACTUALIZAR,
                serde_json::json!({ "dni": actualizado.dni, "tipo": actualizado.tipo }),
            )
            .await;
            app_state.notificador.publicar(
                "personeros.actualizado",
                "personeros",
                format!("Personero {} {} actualizado", actualizado.nombres, actualizado.apellidos),
            );
            HttpResponse::Ok().json(actualizado)
        }
        Err(e) => {
            log::error!("Error al actualizar personero: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn eliminar_personero(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    let personero_id = id.into_inner();

    match sqlx::query("DELETE FROM personeros WHERE id = $1")
        .bind(personero_id)
        .execute(&app_state.pool_pg)
        .await
    {
        Ok(resultado) if resultado.rows_affected() == 0 => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Personero no encontrado" }))
        }
        Ok(_) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "personeros",
                Some(personero_id.to_string()),
                auditoria::ELIMINAR,
                serde_json::json!({}),
            )
            .await;
            app_state.notificador.publicar(
                "personeros.eliminado",
                "personeros",
                format!("Personero {} eliminado", personero_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "mensaje": "Personero eliminado" }))
        }
        Err(e) => {
            log::error!("Error al eliminar personero: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

struct ColumnasPersoneros {
    dni: usize,
    nombres: usize,
    apellidos: usize,
    tipo: usize,
    celular: Option<usize>,
    mesa: Option<usize>,
    ubigeo: Option<usize>,
    local: Option<usize>,
}

fn resolver_columnas(encabezados: &[String]) -> Result<ColumnasPersoneros, ErrorImportacion> {
    let indices =
        importar::indices_obligatorios(encabezados, &["DNI", "NOMBRES", "APELLIDOS", "TIPO"])?;
    Ok(ColumnasPersoneros {
        dni: indices[0],
        nombres: indices[1],
        apellidos: indices[2],
        tipo: indices[3],
        celular: importar::indice_columna(encabezados, "CELULAR"),
        mesa: importar::indice_columna(encabezados, "MESA"),
        ubigeo: importar::indice_columna(encabezados, "UBIGEO"),
        local: importar::indice_columna(encabezados, "LOCAL"),
    })
}

#[derive(Debug, PartialEq, Eq)]
struct FilaPersonero {
    dni: String,
    nombres: String,
    apellidos: String,
    celular: Option<String>,
    tipo: String,
    mesa_id: Option<i64>,
    local_id: Option<i64>,
    codigo_ubigeo: Option<String>,
}

/// Resuelve la asignación de una fila según su tipo, acumulando errores.
/// Devuelve None cuando la fila no puede asignarse.
fn asignacion_de_fila(
    i: usize,
    fila: &[Data],
    tipo: &str,
    columnas: &ColumnasPersoneros,
    indice: &IndiceUbigeo,
    mesas: &HashMap<String, i64>,
    locales: &HashMap<(String, String), Option<i64>>,
    errores: &mut Vec<ErrorFila>,
) -> Option<(Option<i64>, Option<i64>, Option<String>)> {
    match tipo {
        "MESA" => {
            let columna = match columnas.mesa {
                Some(columna) => columna,
                None => {
                    errores.push(ErrorFila::nuevo(i, "MESA", "la columna es necesaria para el tipo MESA"));
                    return None;
                }
            };
            let numero = match importar::valor_codigo(fila, columna, LARGO_NUMERO_MESA) {
                Some(numero) => numero,
                None => {
                    let mensaje = if importar::valor_texto(fila, columna).is_none() {
                        "es obligatorio para el tipo MESA"
                    } else {
                        "debe ser un número de 6 dígitos"
                    };
                    errores.push(ErrorFila::nuevo(i, "MESA", mensaje));
                    return None;
                }
            };
            match mesas.get(&numero) {
                Some(mesa_id) => Some((Some(*mesa_id), None, None)),
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "MESA",
                        format!("la mesa {} no está registrada para este año", numero),
                    ));
                    None
                }
            }
        }
        "LOCAL" => {
            let (columna_ubigeo, columna_local) = match (columnas.ubigeo, columnas.local) {
                (Some(u), Some(l)) => (u, l),
                _ => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "LOCAL",
                        "las columnas UBIGEO y LOCAL son necesarias para el tipo LOCAL",
                    ));
                    return None;
                }
            };
            let codigo = match importar::valor_codigo(fila, columna_ubigeo, LARGO_DISTRITO) {
                Some(codigo) => match indice.validar_cadena(&codigo) {
                    Ok(()) => codigo,
                    Err(mensaje) => {
                        errores.push(ErrorFila::nuevo(i, "UBIGEO", mensaje));
                        return None;
                    }
                },
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "UBIGEO",
                        "debe ser un código de 6 dígitos para el tipo LOCAL",
                    ));
                    return None;
                }
            };
            let nombre = match importar::valor_texto(fila, columna_local) {
                Some(nombre) => nombre,
                None => {
                    errores.push(ErrorFila::nuevo(i, "LOCAL", "es obligatorio para el tipo LOCAL"));
                    return None;
                }
            };
            match locales.get(&clave_local(&codigo, &nombre)) {
                Some(Some(local_id)) => Some((None, Some(*local_id), None)),
                Some(None) => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "LOCAL",
                        format!(
                            "hay más de un local llamado {} en el ubigeo {} para este año",
                            nombre, codigo
                        ),
                    ));
                    None
                }
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "LOCAL",
                        format!(
                            "el local {} no está registrado en el ubigeo {} para este año",
                            nombre, codigo
                        ),
                    ));
                    None
                }
            }
        }
        "DISTRITO" => {
            let columna = match columnas.ubigeo {
                Some(columna) => columna,
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "UBIGEO",
                        "la columna es necesaria para el tipo DISTRITO",
                    ));
                    return None;
                }
            };
            match importar::valor_codigo(fila, columna, LARGO_DISTRITO) {
                Some(codigo) => match indice.validar_cadena(&codigo) {
                    Ok(()) => Some((None, None, Some(codigo))),
                    Err(mensaje) => {
                        errores.push(ErrorFila::nuevo(i, "UBIGEO", mensaje));
                        None
                    }
                },
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "UBIGEO",
                        "debe ser un código de 6 dígitos para el tipo DISTRITO",
                    ));
                    None
                }
            }
        }
        "PROVINCIA" => {
            let columna = match columnas.ubigeo {
                Some(columna) => columna,
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "UBIGEO",
                        "la columna es necesaria para el tipo PROVINCIA",
                    ));
                    return None;
                }
            };
            match importar::valor_codigo(fila, columna, LARGO_PROVINCIA) {
                Some(codigo) if indice.existe_provincia(&codigo) => {
                    Some((None, None, Some(codigo)))
                }
                Some(codigo) => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "UBIGEO",
                        format!("la provincia {} no existe", codigo),
                    ));
                    None
                }
                None => {
                    errores.push(ErrorFila::nuevo(
                        i,
                        "UBIGEO",
                        "debe ser un código de 4 dígitos para el tipo PROVINCIA",
                    ));
                    None
                }
            }
        }
        _ => None,
    }
}

fn validar_filas(
    filas: &[Vec<Data>],
    columnas: &ColumnasPersoneros,
    indice: &IndiceUbigeo,
    mesas: &HashMap<String, i64>,
    locales: &HashMap<(String, String), Option<i64>>,
    existentes: &HashSet<String>,
) -> (Vec<FilaPersonero>, Vec<ErrorFila>) {
    let mut validas = Vec::new();
    let mut errores = Vec::new();
    let mut vistos: HashSet<String> = HashSet::new();

    for (i, fila) in filas.iter().enumerate() {
        if importar::fila_vacia(fila) {
            continue;
        }

        let dni = match importar::valor_codigo(fila, columnas.dni, 8) {
            Some(dni) => Some(dni),
            None => {
                let mensaje = if importar::valor_texto(fila, columnas.dni).is_none() {
                    "es obligatorio"
                } else {
                    "debe tener 8 dígitos"
                };
                errores.push(ErrorFila::nuevo(i, "DNI", mensaje));
                None
            }
        };
        let nombres = importar::valor_texto(fila, columnas.nombres);
        if nombres.is_none() {
            errores.push(ErrorFila::nuevo(i, "NOMBRES", "es obligatorio"));
        }
        let apellidos = importar::valor_texto(fila, columnas.apellidos);
        if apellidos.is_none() {
            errores.push(ErrorFila::nuevo(i, "APELLIDOS", "es obligatorio"));
        }
        let celular = columnas
            .celular
            .and_then(|columna| importar::valor_texto(fila, columna));

        let tipo = match importar::valor_texto(fila, columnas.tipo) {
            Some(valor) => {
                let tipo = valor.to_uppercase();
                if tipo_valido(&tipo) {
                    Some(tipo)
                } else {
                    errores.push(ErrorFila::nuevo(i, "TIPO", mensaje_tipo(&valor)));
                    None
                }
            }
            None => {
                errores.push(ErrorFila::nuevo(i, "TIPO", "es obligatorio"));
                None
            }
        };

        let asignacion = tipo.as_deref().and_then(|tipo| {
            asignacion_de_fila(i, fila, tipo, columnas, indice, mesas, locales, &mut errores)
        });

        let (dni, nombres, apellidos, tipo, asignacion) =
            match (dni, nombres, apellidos, tipo, asignacion) {
                (Some(d), Some(n), Some(a), Some(t), Some(asig)) => (d, n, a, t, asig),
                _ => continue,
            };

        if existentes.contains(&dni) {
            errores.push(ErrorFila::nuevo(
                i,
                "DNI",
                format!("el DNI {} ya está registrado para este año", dni),
            ));
            continue;
        }
        if !vistos.insert(dni.clone()) {
            errores.push(ErrorFila::nuevo(i, "DNI", "está repetido en el archivo"));
            continue;
        }

        let (mesa_id, local_id, codigo_ubigeo) = asignacion;
        validas.push(FilaPersonero {
            dni,
            nombres,
            apellidos,
            celular,
            tipo,
            mesa_id,
            local_id,
            codigo_ubigeo,
        });
    }

    (validas, errores)
}

pub async fn importar_personeros(
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
    let mesas: HashMap<String, i64> =
        sqlx::query_as::<_, (i64, String)>("SELECT id, numero FROM mesas WHERE anho = $1")
            .bind(anho)
            .fetch_all(&app_state.pool_pg)
            .await
            .map_err(|e| {
                log::error!("Error al cargar mesas del año {}: {}", anho, e);
                error::ErrorInternalServerError("Error consultando mesas")
            })?
            .into_iter()
            .map(|(id, numero)| (numero, id))
            .collect();
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
        sqlx::query_scalar::<_, String>("SELECT dni FROM personeros WHERE anho = $1")
            .bind(anho)
            .fetch_all(&app_state.pool_pg)
            .await
            .map_err(|e| {
                log::error!("Error al cargar personeros del año {}: {}", anho, e);
                error::ErrorInternalServerError("Error consultando personeros")
            })?
            .into_iter()
            .collect();

    let consideradas = hoja
        .filas
        .iter()
        .filter(|fila| !importar::fila_vacia(fila))
        .count();
    let (validas, errores) =
        validar_filas(&hoja.filas, &columnas, &indice, &mesas, &locales, &existentes);

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
        error::ErrorInternalServerError("Error insertando personeros")
    })?;
    for lote in validas.chunks(500) {
        let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO personeros (anho, dni, nombres, apellidos, celular, tipo, mesa_id, local_id, codigo_ubigeo) ",
        );
        consulta.push_values(lote, |mut fila_sql, fila| {
            fila_sql
                .push_bind(anho)
                .push_bind(&fila.dni)
                .push_bind(&fila.nombres)
                .push_bind(&fila.apellidos)
                .push_bind(&fila.celular)
                .push_bind(&fila.tipo)
                .push_bind(fila.mesa_id)
                .push_bind(fila.local_id)
                .push_bind(&fila.codigo_ubigeo);
        });
        consulta.build().execute(&mut *tx).await.map_err(|e| {
            log::error!("Error al insertar personeros: {}", e);
            error::ErrorInternalServerError("Error insertando personeros")
        })?;
    }
    tx.commit().await.map_err(|e| {
        log::error!("Error al confirmar importación de personeros: {}", e);
        error::ErrorInternalServerError("Error insertando personeros")
    })?;

    auditoria::registrar(
        &app_state.pool_pg,
        aut.login(),
        "personeros",
        None,
        auditoria::IMPORTAR,
        serde_json::json!({ "archivo": nombre_archivo, "anho": anho, "insertados": validas.len() }),
    )
    .await;
    app_state.notificador.publicar(
        "personeros.importado",
        "personeros",
        format!("{} personeros importados para el año {}", validas.len(), anho),
    );

    Ok(HttpResponse::Ok().json(ResultadoImportacion::completo(validas.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columnas() -> ColumnasPersoneros {
        ColumnasPersoneros {
            dni: 0,
            nombres: 1,
            apellidos: 2,
            tipo: 3,
            celular: Some(4),
            mesa: Some(5),
            ubigeo: Some(6),
            local: Some(7),
        }
    }

    fn fila(celdas: &[&str]) -> Vec<Data> {
        celdas.iter().map(|c| Data::String(c.to_string())).collect()
    }

    fn mesas_de_prueba() -> HashMap<String, i64> {
        [("030101".to_string(), 10)].into()
    }

    fn locales_de_prueba() -> HashMap<(String, String), Option<i64>> {
        mapa_de_locales(vec![(1, "140101".into(), "IE SAN JOSE".into())])
    }

    #[test]
    fn cada_tipo_resuelve_su_asignacion() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &["1402"]);
        let filas = vec![
            fila(&["11111111", "ANA", "QUISPE", "mesa", "999888777", "030101", "", ""]),
            fila(&["22222222", "LUIS", "ROJAS", "LOCAL", "", "", "140101", "IE SAN JOSE"]),
            fila(&["33333333", "EVA", "TORRES", "DISTRITO", "", "", "140101", ""]),
            fila(&["44444444", "JOSE", "DIAZ", "PROVINCIA", "", "", "1402", ""]),
        ];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas(),
            &indice,
            &mesas_de_prueba(),
            &locales_de_prueba(),
            &HashSet::new(),
        );
        assert!(errores.is_empty(), "errores: {:?}", errores);
        assert_eq!(validas.len(), 4);
        assert_eq!(validas[0].mesa_id, Some(10));
        assert_eq!(validas[0].celular.as_deref(), Some("999888777"));
        assert_eq!(validas[1].local_id, Some(1));
        assert_eq!(validas[2].codigo_ubigeo.as_deref(), Some("140101"));
        assert_eq!(validas[3].codigo_ubigeo.as_deref(), Some("1402"));
    }

    #[test]
    fn tipo_desconocido_nombra_los_permitidos() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["11111111", "ANA", "QUISPE", "REGIONAL", "", "", "", ""])];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas(),
            &indice,
            &mesas_de_prueba(),
            &locales_de_prueba(),
            &HashSet::new(),
        );
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 1);
        assert_eq!(errores[0].columna, "TIPO");
        assert!(errores[0].mensaje.contains("MESA, LOCAL, DISTRITO, PROVINCIA"));
    }

    #[test]
    fn mesa_inexistente_es_error_de_asignacion() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["11111111", "ANA", "QUISPE", "MESA", "", "999999", "", ""])];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas(),
            &indice,
            &mesas_de_prueba(),
            &locales_de_prueba(),
            &HashSet::new(),
        );
        assert!(validas.is_empty());
        assert_eq!(errores[0].columna, "MESA");
        assert!(errores[0].mensaje.contains("999999"));
    }

    #[test]
    fn local_con_nombre_ambiguo_es_error_de_asignacion() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let locales = mapa_de_locales(vec![
            (1, "140101".into(), "IE San Jose".into()),
            (2, "140101".into(), "IE SAN JOSE".into()),
        ]);
        let filas = vec![fila(&["22222222", "LUIS", "ROJAS", "LOCAL", "", "", "140101", "IE SAN JOSE"])];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas(),
            &indice,
            &mesas_de_prueba(),
            &locales,
            &HashSet::new(),
        );
        assert!(validas.is_empty());
        assert_eq!(errores[0].columna, "LOCAL");
        assert!(errores[0].mensaje.contains("más de un local"));
    }

    #[test]
    fn dni_repetido_en_bd_y_archivo() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let existentes: HashSet<String> = ["11111111".to_string()].into();
        let filas = vec![
            fila(&["11111111", "ANA", "QUISPE", "DISTRITO", "", "", "140101", ""]),
            fila(&["22222222", "LUIS", "ROJAS", "DISTRITO", "", "", "140101", ""]),
            fila(&["22222222", "LUIS", "ROJAS", "DISTRITO", "", "", "140101", ""]),
        ];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas(),
            &indice,
            &mesas_de_prueba(),
            &locales_de_prueba(),
            &existentes,
        );
        assert_eq!(validas.len(), 1);
        assert_eq!(errores.len(), 2);
        assert!(errores[0].mensaje.contains("ya está registrado"));
        assert!(errores[1].mensaje.contains("repetido en el archivo"));
    }

    #[test]
    fn columna_de_asignacion_ausente_es_error() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let columnas = ColumnasPersoneros {
            dni: 0,
            nombres: 1,
            apellidos: 2,
            tipo: 3,
            celular: None,
            mesa: None,
            ubigeo: None,
            local: None,
        };
        let filas = vec![fila(&["11111111", "ANA", "QUISPE", "MESA"])];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas,
            &indice,
            &mesas_de_prueba(),
            &locales_de_prueba(),
            &HashSet::new(),
        );
        assert!(validas.is_empty());
        assert_eq!(errores[0].columna, "MESA");
        assert!(errores[0].mensaje.contains("columna"));
    }

    #[test]
    fn dni_invalido_y_tipo_vacio_juntan_errores() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);
        let filas = vec![fila(&["123", "ANA", "QUISPE", "", "", "", "", ""])];
        let (validas, errores) = validar_filas(
            &filas,
            &columnas(),
            &indice,
            &mesas_de_prueba(),
            &locales_de_prueba(),
            &HashSet::new(),
        );
        assert!(validas.is_empty());
        assert_eq!(errores.len(), 2);
        assert_eq!(errores[0].columna, "DNI");
        assert_eq!(errores[1].columna, "TIPO");
    }
}
