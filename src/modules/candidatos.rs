use std::path::Path;

use actix_multipart::Multipart;
use actix_web::{error, web, Error, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::modules::auditoria;
use crate::modules::importar;
use crate::modules::login::Autenticado;
use crate::modules::paginacion::{self, ListaPaginada};
use crate::modules::ubigeo::es_codigo;
use crate::structs::AppState;

pub const MAX_BYTES_FOTO: usize = 5 * 1024 * 1024;
pub const EXTENSIONES_FOTO: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(FromRow, Serialize, Debug)]
pub struct Candidato {
    pub id: i64,
    pub anho: i32,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub organizacion: String,
    pub cargo: String,
    pub numero: Option<i32>,
    pub foto: Option<String>,
    pub creado_en: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct CandidatoCreate {
    pub anho: i32,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub organizacion: String,
    pub cargo: String,
    pub numero: Option<i32>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct CandidatoUpdate {
    pub nombres: Option<String>,
    pub apellidos: Option<String>,
    pub organizacion: Option<String>,
    pub cargo: Option<String>,
    pub numero: Option<i32>,
}

#[derive(Deserialize)]
pub struct FiltrosCandidatos {
    pub pagina: Option<i64>,
    pub limite: Option<i64>,
    pub buscar: Option<String>,
    pub anho: Option<i32>,
    pub cargo: Option<String>,
    pub organizacion: Option<String>,
}

fn aplicar_filtros(consulta: &mut QueryBuilder<Postgres>, filtros: &FiltrosCandidatos) {
    if let Some(anho) = filtros.anho {
        consulta.push(" AND anho = ").push_bind(anho);
    }
    if let Some(cargo) = filtros.cargo.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        consulta.push(" AND cargo ILIKE ").push_bind(cargo.to_string());
    }
    if let Some(patron) = paginacion::patron_busqueda(&filtros.organizacion) {
        consulta.push(" AND organizacion ILIKE ").push_bind(patron);
    }
    if let Some(patron) = paginacion::patron_busqueda(&filtros.buscar) {
        consulta
            .push(" AND (dni ILIKE ")
            .push_bind(patron.clone())
            .push(" OR nombres ILIKE ")
            .push_bind(patron.clone())
            .push(" OR apellidos ILIKE ")
            .push_bind(patron)
            .push(")");
    }
}

pub async fn listar_candidatos(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    filtros: web::Query<FiltrosCandidatos>,
) -> impl Responder {
    let pagina = paginacion::pagina(filtros.pagina);
    let limite = paginacion::limite(filtros.limite);

    let mut consulta: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM candidatos WHERE 1=1");
    aplicar_filtros(&mut consulta, &filtros);
    let total = match consulta
        .build_query_scalar::<i64>()
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(total) => total,
        Err(e) => {
            log::error!("Error al contar candidatos: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, anho, dni, nombres, apellidos, organizacion, cargo, numero, foto, creado_en
         FROM candidatos WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    consulta
        .push(" ORDER BY organizacion, numero NULLS LAST, apellidos LIMIT ")
        .push_bind(limite)
        .push(" OFFSET ")
        .push_bind(paginacion::offset(pagina, limite));

    match consulta
        .build_query_as::<Candidato>()
        .fetch_all(&app_state.pool_pg)
        .await
    {
        Ok(candidatos) => {
            HttpResponse::Ok().json(ListaPaginada::nueva(candidatos, total, pagina, limite))
        }
        Err(e) => {
            log::error!("Error al obtener candidatos: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn obtener_candidato(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    match sqlx::query_as::<_, Candidato>(
        "SELECT id, anho, dni, nombres, apellidos, organizacion, cargo, numero, foto, creado_en
         FROM candidatos WHERE id = $1",
    )
    .bind(id.into_inner())
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(candidato)) => HttpResponse::Ok().json(candidato),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Candidato no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al obtener candidato: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn crear_candidato(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    candidato: web::Json<CandidatoCreate>,
) -> impl Responder {
    if !importar::anho_valido(candidato.anho) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Año electoral inválido" }));
    }
    let dni = candidato.dni.trim().to_string();
    if !es_codigo(&dni, 8) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El DNI debe tener 8 dígitos" }));
    }
    let nombres = candidato.nombres.trim().to_string();
    let apellidos = candidato.apellidos.trim().to_string();
    let organizacion = candidato.organizacion.trim().to_string();
    let cargo = candidato.cargo.trim().to_string();
    if nombres.is_empty() || apellidos.is_empty() || organizacion.is_empty() || cargo.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Nombres, apellidos, organización y cargo son obligatorios"
        }));
    }
    if let Some(numero) = candidato.numero {
        if numero < 1 {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": "El número en la lista debe ser positivo" }));
        }
    }

    match sqlx::query_as::<_, Candidato>(
        "INSERT INTO candidatos (anho, dni, nombres, apellidos, organizacion, cargo, numero)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (anho, dni) DO NOTHING
         RETURNING id, anho, dni, nombres, apellidos, organizacion, cargo, numero, foto, creado_en",
    )
    .bind(candidato.anho)
    .bind(&dni)
    .bind(&nombres)
    .bind(&apellidos)
    .bind(&organizacion)
    .bind(&cargo)
    .bind(candidato.numero)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(creado)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "candidatos",
                Some(creado.id.to_string()),
                auditoria::CREAR,
                serde_json::json!({ "dni": creado.dni, "organizacion": creado.organizacion, "anho": creado.anho }),
            )
            .await;
            app_state.notificador.publicar(
                "candidatos.creado",
                "candidatos",
                format!("Candidato {} {} registrado", creado.nombres, creado.apellidos),
            );
            HttpResponse::Created().json(creado)
        }
        Ok(None) => HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("El candidato con DNI {} ya existe para el año {}", dni, candidato.anho)
        })),
        Err(e) => {
            log::error!("Error al crear candidato: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn actualizar_candidato(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
    cambios: web::Json<CandidatoUpdate>,
) -> impl Responder {
    let candidato_id = id.into_inner();

    let actual = match sqlx::query_as::<_, Candidato>(
        "SELECT id, anho, dni, nombres, apellidos, organizacion, cargo, numero, foto, creado_en
         FROM candidatos WHERE id = $1",
    )
    .bind(candidato_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(candidato)) => candidato,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Candidato no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al buscar candidato {}: {}", candidato_id, e);
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
    let organizacion = cambios
        .organizacion
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.organizacion);
    let cargo = cambios
        .cargo
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.cargo);
    let numero = cambios.numero.or(actual.numero);
    if let Some(numero) = numero {
        if numero < 1 {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": "El número en la lista debe ser positivo" }));
        }
    }

    match sqlx::query_as::<_, Candidato>(
        "UPDATE candidatos
         SET nombres = $1, apellidos = $2, organizacion = $3, cargo = $4, numero = $5
         WHERE id = $6
         RETURNING id, anho, dni, nombres, apellidos, organizacion, cargo, numero, foto, creado_en",
    )
    .bind(&nombres)
    .bind(&apellidos)
    .bind(&organizacion)
    .bind(&cargo)
    .bind(numero)
    .bind(candidato_id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(actualizado) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "candidatos",
                Some(candidato_id.to_string()),
                auditoria::ACTUALIZAR,
                serde_json::json!({ "dni": actualizado.dni }),
            )
            .await;
            app_state.notificador.publicar(
                "candidatos.actualizado",
                "candidatos",
                format!("Candidato {} {} actualizado", actualizado.nombres, actualizado.apellidos),
            );
            HttpResponse::Ok().json(actualizado)
        }
        Err(e) => {
            log::error!("Error al actualizar candidato: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn eliminar_candidato(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    let candidato_id = id.into_inner();

    let foto = match sqlx::query_scalar::<_, Option<String>>(
        "SELECT foto FROM candidatos WHERE id = $1",
    )
    .bind(candidato_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(foto)) => foto,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Candidato no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al buscar candidato {}: {}", candidato_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    match sqlx::query("DELETE FROM candidatos WHERE id = $1")
        .bind(candidato_id)
        .execute(&app_state.pool_pg)
        .await
    {
        Ok(_) => {
            if let Some(foto) = foto {
                borrar_archivo(&app_state, &foto);
            }
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "candidatos",
                Some(candidato_id.to_string()),
                auditoria::ELIMINAR,
                serde_json::json!({}),
            )
            .await;
            app_state.notificador.publicar(
                "candidatos.eliminado",
                "candidatos",
                format!("Candidato {} eliminado", candidato_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "mensaje": "Candidato eliminado" }))
        }
        Err(e) => {
            log::error!("Error al eliminar candidato: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

/// Valida la extensión del archivo de foto contra la lista permitida.
fn extension_foto(nombre: &str) -> Option<String> {
    let extension = Path::new(nombre).extension()?.to_str()?.to_lowercase();
    if EXTENSIONES_FOTO.contains(&extension.as_str()) {
        Some(extension)
    } else {
        None
    }
}

/// Borra un archivo guardado bajo DIR_ARCHIVOS sin fallar la operación.
fn borrar_archivo(app_state: &AppState, relativo: &str) {
    let ruta = app_state.dir_archivos.join(relativo);
    if let Err(e) = std::fs::remove_file(&ruta) {
        log::warn!("No se pudo borrar el archivo {}: {}", relativo, e);
    }
}

pub async fn subir_foto_candidato(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
    formulario: Multipart,
) -> Result<HttpResponse, Error> {
    let candidato_id = id.into_inner();

    let anterior = match sqlx::query_scalar::<_, Option<String>>(
        "SELECT foto FROM candidatos WHERE id = $1",
    )
    .bind(candidato_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(foto)) => foto,
        Ok(None) => {
            return Ok(HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Candidato no encontrado" })))
        }
        Err(e) => {
            log::error!("Error al buscar candidato {}: {}", candidato_id, e);
            return Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            })));
        }
    };

    let (nombre_archivo, datos) =
        importar::archivo_de_multipart(formulario, MAX_BYTES_FOTO).await?;
    let extension = match extension_foto(&nombre_archivo) {
        Some(extension) => extension,
        None => {
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Formato no permitido. Use {}", EXTENSIONES_FOTO.join(", "))
            })))
        }
    };

    let nombre_unico = format!("{}.{}", Uuid::new_v4(), extension);
    let ruta_relativa = format!("candidatos/{}", nombre_unico);
    let ruta = app_state.dir_archivos.join(&ruta_relativa);
    web::block(move || std::fs::write(&ruta, &datos))
        .await
        .map_err(|e| {
            log::error!("Error al programar escritura de foto: {}", e);
            error::ErrorInternalServerError("Error guardando la foto")
        })?
        .map_err(|e| {
            log::error!("Error al escribir la foto: {}", e);
            error::ErrorInternalServerError("Error guardando la foto")
        })?;

    if let Err(e) = sqlx::query("UPDATE candidatos SET foto = $1 WHERE id = $2")
        .bind(&ruta_relativa)
        .bind(candidato_id)
        .execute(&app_state.pool_pg)
        .await
    {
        log::error!("Error al registrar la foto del candidato: {}", e);
        // El archivo recién escrito queda huérfano; se retira.
        borrar_archivo(&app_state, &ruta_relativa);
        return Ok(HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Database error",
            "details": e.to_string()
        })));
    }

    if let Some(anterior) = anterior {
        borrar_archivo(&app_state, &anterior);
    }

    auditoria::registrar(
        &app_state.pool_pg,
        aut.login(),
        "candidatos",
        Some(candidato_id.to_string()),
        auditoria::ACTUALIZAR,
        serde_json::json!({ "foto": ruta_relativa }),
    )
    .await;
    app_state.notificador.publicar(
        "candidatos.foto",
        "candidatos",
        format!("Foto actualizada para el candidato {}", candidato_id),
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({ "foto": ruta_relativa })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensiones_permitidas() {
        assert_eq!(extension_foto("retrato.jpg").as_deref(), Some("jpg"));
        assert_eq!(extension_foto("RETRATO.JPEG").as_deref(), Some("jpeg"));
        assert_eq!(extension_foto("foto oficial.PNG").as_deref(), Some("png"));
    }

    #[test]
    fn extensiones_rechazadas() {
        assert_eq!(extension_foto("retrato.gif"), None);
        assert_eq!(extension_foto("retrato.pdf"), None);
        assert_eq!(extension_foto("sin_extension"), None);
        assert_eq!(extension_foto("truco.jpg.exe"), None);
    }
}
