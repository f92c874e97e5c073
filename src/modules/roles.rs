use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::modules::auditoria;
use crate::modules::login::Autenticado;
use crate::structs::AppState;

#[derive(FromRow, Serialize, Debug)]
pub struct Rol {
    pub id: i64,
    pub nombre: String,
    pub descripcion: String,
    pub permisos: Vec<String>,
}

#[derive(Deserialize)]
pub struct RolNuevo {
    pub nombre: String,
    pub descripcion: Option<String>,
    pub permisos: Vec<String>,
}

fn limpiar_permisos(permisos: &[String]) -> Vec<String> {
    let mut limpios: Vec<String> = permisos
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    limpios.sort();
    limpios.dedup();
    limpios
}

pub async fn listar_roles(app_state: web::Data<AppState>, _aut: Autenticado) -> impl Responder {
    match sqlx::query_as::<_, Rol>(
        "SELECT id, nombre, descripcion, permisos FROM roles ORDER BY id",
    )
    .fetch_all(&app_state.pool_pg)
    .await
    {
        Ok(roles) => HttpResponse::Ok().json(roles),
        Err(e) => {
            log::error!("Error BD listando roles: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error consultando roles",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn crear_rol(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    datos: web::Json<RolNuevo>,
) -> impl Responder {
    if let Err(e) = aut.exigir_permiso("roles.crear") {
        return e.error_response();
    }
    let nombre = datos.nombre.trim().to_string();
    if nombre.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "El nombre es obligatorio" }));
    }
    let permisos = limpiar_permisos(&datos.permisos);
    if permisos.is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El rol necesita al menos un permiso" }));
    }
    let descripcion = datos
        .descripcion
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    match sqlx::query_as::<_, Rol>(
        "INSERT INTO roles (nombre, descripcion, permisos) VALUES ($1, $2, $3)
         ON CONFLICT (nombre) DO NOTHING
         RETURNING id, nombre, descripcion, permisos",
    )
    .bind(&nombre)
    .bind(&descripcion)
    .bind(&permisos)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(rol)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "roles",
                Some(rol.id.to_string()),
                auditoria::CREAR,
                serde_json::json!({ "nombre": rol.nombre, "permisos": rol.permisos }),
            )
            .await;
            app_state.notificador.publicar(
                "roles.creado",
                "roles",
                format!("Rol {} creado", rol.nombre),
            );
            HttpResponse::Created().json(rol)
        }
        Ok(None) => {
            HttpResponse::Conflict().json(serde_json::json!({ "error": format!("El rol {} ya existe", nombre) }))
        }
        Err(e) => {
            log::error!("Error BD creando rol: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error creando rol",
                "details": e.to_string()
            }))
        }
    }
}

#[derive(Deserialize)]
pub struct RolCambios {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub permisos: Option<Vec<String>>,
}

pub async fn actualizar_rol(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    ruta: web::Path<i64>,
    datos: web::Json<RolCambios>,
) -> impl Responder {
    if let Err(e) = aut.exigir_permiso("roles.actualizar") {
        return e.error_response();
    }
    let id = ruta.into_inner();

    let actual = match sqlx::query_as::<_, Rol>(
        "SELECT id, nombre, descripcion, permisos FROM roles WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(rol)) => rol,
        Ok(None) => {
            return HttpResponse::NotFound().json(serde_json::json!({ "error": "El rol no existe" }))
        }
        Err(e) => {
            log::error!("Error BD buscando rol {}: {}", id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error actualizando rol",
                "details": e.to_string()
            }));
        }
    };

    let nombre = datos
        .nombre
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or(actual.nombre);
    let descripcion = datos
        .descripcion
        .as_deref()
        .map(str::trim)
        .map(str::to_string)
        .unwrap_or(actual.descripcion);
    let permisos = match &datos.permisos {
        Some(nuevos) => {
            let limpios = limpiar_permisos(nuevos);
            if limpios.is_empty() {
                return HttpResponse::BadRequest()
                    .json(serde_json::json!({ "error": "El rol necesita al menos un permiso" }));
            }
            limpios
        }
        None => actual.permisos,
    };

    let duplicado = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM roles WHERE nombre = $1 AND id <> $2)",
    )
    .bind(&nombre)
    .bind(id)
    .fetch_one(&app_state.pool_pg)
    .await;
    match duplicado {
        Ok(false) => {}
        Ok(true) => {
            return HttpResponse::Conflict()
                .json(serde_json::json!({ "error": format!("El rol {} ya existe", nombre) }))
        }
        Err(e) => {
            log::error!("Error BD verificando nombre de rol: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error actualizando rol",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Rol>(
        "UPDATE roles SET nombre = $1, descripcion = $2, permisos = $3 WHERE id = $4
         RETURNING id, nombre, descripcion, permisos",
    )
    .bind(&nombre)
    .bind(&descripcion)
    .bind(&permisos)
    .bind(id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(rol) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "roles",
                Some(id.to_string()),
                auditoria::ACTUALIZAR,
                serde_json::json!({ "nombre": rol.nombre, "permisos": rol.permisos }),
            )
            .await;
            app_state.notificador.publicar(
                "roles.actualizado",
                "roles",
                format!("Rol {} actualizado", rol.nombre),
            );
            HttpResponse::Ok().json(rol)
        }
        Err(e) => {
            log::error!("Error BD actualizando rol {}: {}", id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error actualizando rol",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn eliminar_rol(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    ruta: web::Path<i64>,
) -> impl Responder {
    if let Err(e) = aut.exigir_permiso("roles.eliminar") {
        return e.error_response();
    }
    let id = ruta.into_inner();

    let en_uso = match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM usuarios WHERE rol_id = $1",
    )
    .bind(id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(cantidad) => cantidad,
        Err(e) => {
            log::error!("Error BD verificando uso del rol {}: {}", id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error eliminando rol",
                "details": e.to_string()
            }));
        }
    };
    if en_uso > 0 {
        return HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("El rol está asignado a {} usuario(s)", en_uso)
        }));
    }

    match sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(id)
        .execute(&app_state.pool_pg)
        .await
    {
        Ok(resultado) if resultado.rows_affected() == 0 => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "El rol no existe" }))
        }
        Ok(_) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "roles",
                Some(id.to_string()),
                auditoria::ELIMINAR,
                serde_json::json!({}),
            )
            .await;
            app_state
                .notificador
                .publicar("roles.eliminado", "roles", format!("Rol {} eliminado", id));
            HttpResponse::Ok().json(serde_json::json!({ "mensaje": "Rol eliminado" }))
        }
        Err(e) => {
            log::error!("Error BD eliminando rol {}: {}", id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error eliminando rol",
                "details": e.to_string()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permisos_se_normalizan_y_deduplican() {
        let permisos = limpiar_permisos(&[
            " Usuarios.Crear ".to_string(),
            "usuarios.crear".to_string(),
            "".to_string(),
            "mesas.ver".to_string(),
        ]);
        assert_eq!(permisos, vec!["mesas.ver".to_string(), "usuarios.crear".to_string()]);
    }
}
