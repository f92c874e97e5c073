use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder};

use crate::modules::auditoria;
use crate::modules::login::{hash_password, Autenticado};
use crate::modules::paginacion::{self, ListaPaginada};
use crate::modules::ubigeo::es_codigo;
use crate::structs::AppState;

#[derive(FromRow, Serialize, Debug)]
pub struct Usuario {
    pub id: i64,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub celular: Option<String>,
    pub login: String,
    pub rol_id: i64,
    pub activo: i32,
    pub creado_en: DateTime<Utc>,
}

#[derive(FromRow, Serialize, Debug)]
pub struct UsuarioLista {
    pub id: i64,
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub celular: Option<String>,
    pub login: String,
    pub rol_id: i64,
    pub rol_nombre: String,
    pub activo: i32,
    pub creado_en: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct UsuarioCreate {
    pub dni: String,
    pub nombres: String,
    pub apellidos: String,
    pub celular: Option<String>,
    pub rol_id: i64,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct UsuarioUpdate {
    pub password: Option<String>,
    pub celular: Option<String>,
    pub rol_id: i64,
    pub activo: i32,
}

#[derive(Serialize)]
pub struct UsuarioConPassword {
    pub usuario: Usuario,
    pub password_generada: String,
}

// inicial del nombre + primer apellido + DNI, todo en minúsculas
fn generar_login(nombres: &str, apellidos: &str, dni: &str) -> String {
    let inicial_nombre = nombres
        .trim()
        .chars()
        .next()
        .map(|c| c.to_lowercase().to_string())
        .unwrap_or_default();

    let primer_apellido = apellidos
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    format!("{}{}{}", inicial_nombre, primer_apellido, dni)
}

fn generar_password() -> String {
    const CARACTERES: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CARACTERES.len());
            CARACTERES[idx] as char
        })
        .collect()
}

#[derive(Deserialize)]
pub struct FiltrosUsuarios {
    pub pagina: Option<i64>,
    pub limite: Option<i64>,
    pub buscar: Option<String>,
    pub rol_id: Option<i64>,
    pub activo: Option<i32>,
}

fn aplicar_filtros(consulta: &mut QueryBuilder<Postgres>, filtros: &FiltrosUsuarios) {
    if let Some(patron) = paginacion::patron_busqueda(&filtros.buscar) {
        consulta
            .push(" AND (u.nombres ILIKE ")
            .push_bind(patron.clone())
            .push(" OR u.apellidos ILIKE ")
            .push_bind(patron.clone())
            .push(" OR u.login ILIKE ")
            .push_bind(patron.clone())
            .push(" OR u.dni ILIKE ")
            .push_bind(patron)
            .push(")");
    }
    if let Some(rol_id) = filtros.rol_id {
        consulta.push(" AND u.rol_id = ").push_bind(rol_id);
    }
    if let Some(activo) = filtros.activo {
        consulta.push(" AND u.activo = ").push_bind(activo);
    }
}

pub async fn listar_usuarios(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    filtros: web::Query<FiltrosUsuarios>,
) -> impl Responder {
    let pagina = paginacion::pagina(filtros.pagina);
    let limite = paginacion::limite(filtros.limite);

    let mut consulta: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM usuarios u WHERE 1=1");
    aplicar_filtros(&mut consulta, &filtros);
    let total = match consulta
        .build_query_scalar::<i64>()
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(total) => total,
        Err(e) => {
            log::error!("Error al contar usuarios: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT u.id, u.dni, u.nombres, u.apellidos, u.celular, u.login,
                u.rol_id, r.nombre AS rol_nombre, u.activo, u.creado_en
         FROM usuarios u JOIN roles r ON r.id = u.rol_id WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    consulta
        .push(" ORDER BY u.id DESC LIMIT ")
        .push_bind(limite)
        .push(" OFFSET ")
        .push_bind(paginacion::offset(pagina, limite));

    match consulta
        .build_query_as::<UsuarioLista>()
        .fetch_all(&app_state.pool_pg)
        .await
    {
        Ok(usuarios) => {
            HttpResponse::Ok().json(ListaPaginada::nueva(usuarios, total, pagina, limite))
        }
        Err(e) => {
            log::error!("Error al obtener usuarios: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn crear_usuario(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    usuario: web::Json<UsuarioCreate>,
) -> impl Responder {
    if let Err(e) = aut.exigir_permiso("usuarios.crear") {
        return e.error_response();
    }

    let dni = usuario.dni.trim().to_string();
    let nombres = usuario.nombres.trim().to_string();
    let apellidos = usuario.apellidos.trim().to_string();
    if !es_codigo(&dni, 8) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El DNI debe tener 8 dígitos" }));
    }
    if nombres.is_empty() || apellidos.is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "Nombres y apellidos son obligatorios" }));
    }

    let rol_existe = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM roles WHERE id = $1)")
        .bind(usuario.rol_id)
        .fetch_one(&app_state.pool_pg)
        .await;
    match rol_existe {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": "El rol indicado no existe" }))
        }
        Err(e) => {
            log::error!("Error al verificar rol: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    let dni_ocupado =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM usuarios WHERE dni = $1)")
            .bind(&dni)
            .fetch_one(&app_state.pool_pg)
            .await;
    match dni_ocupado {
        Ok(false) => {}
        Ok(true) => {
            return HttpResponse::Conflict().json(
                serde_json::json!({ "error": format!("Ya existe un usuario con DNI {}", dni) }),
            )
        }
        Err(e) => {
            log::error!("Error al verificar DNI: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    let login = generar_login(&nombres, &apellidos, &dni);
    let password_generada = generar_password();
    let hashed_password = hash_password(&password_generada);

    let user = match sqlx::query_as::<_, Usuario>(
        "INSERT INTO usuarios (dni, nombres, apellidos, celular, login, password, rol_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, dni, nombres, apellidos, celular, login, rol_id, activo, creado_en",
    )
    .bind(&dni)
    .bind(&nombres)
    .bind(&apellidos)
    .bind(&usuario.celular)
    .bind(&login)
    .bind(&hashed_password)
    .bind(usuario.rol_id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(u) => u,
        Err(e) => {
            log::error!("Error al crear usuario: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    auditoria::registrar(
        &app_state.pool_pg,
        aut.login(),
        "usuarios",
        Some(user.id.to_string()),
        auditoria::CREAR,
        serde_json::json!({ "login": user.login, "rol_id": user.rol_id }),
    )
    .await;
    app_state.notificador.publicar(
        "usuarios.creado",
        "usuarios",
        format!("Usuario {} creado", user.login),
    );

    HttpResponse::Created().json(UsuarioConPassword {
        usuario: user,
        password_generada,
    })
}

pub async fn actualizar_usuario(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
    usuario: web::Json<UsuarioUpdate>,
) -> impl Responder {
    if let Err(e) = aut.exigir_permiso("usuarios.actualizar") {
        return e.error_response();
    }
    let user_id = id.into_inner();

    let password_actual = match sqlx::query_scalar::<_, String>(
        "SELECT password FROM usuarios WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(password)) => password,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Usuario no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al buscar usuario {}: {}", user_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    };

    let rol_existe = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM roles WHERE id = $1)")
        .bind(usuario.rol_id)
        .fetch_one(&app_state.pool_pg)
        .await;
    match rol_existe {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": "El rol indicado no existe" }))
        }
        Err(e) => {
            log::error!("Error al verificar rol: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }));
        }
    }

    let password_to_use = match &usuario.password {
        Some(p) if !p.trim().is_empty() => hash_password(p),
        _ => password_actual,
    };

    let updated_user = match sqlx::query_as::<_, Usuario>(
        "UPDATE usuarios SET password = $1, celular = $2, rol_id = $3, activo = $4 WHERE id = $5
         RETURNING id, dni, nombres, apellidos, celular, login, rol_id, activo, creado_en",
    )
    .bind(&password_to_use)
    .bind(&usuario.celular)
    .bind(usuario.rol_id)
    .bind(usuario.activo)
    .bind(user_id)
    .fetch_one(&app_state.pool_pg)
    .await
    {
        Ok(u) => u,
        Err(e) => {
            log::error!("Error al actualizar usuario: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error al actualizar usuario",
                "details": e.to_string()
            }));
        }
    };

    auditoria::registrar(
        &app_state.pool_pg,
        aut.login(),
        "usuarios",
        Some(user_id.to_string()),
        auditoria::ACTUALIZAR,
        serde_json::json!({ "rol_id": updated_user.rol_id, "activo": updated_user.activo }),
    )
    .await;
    app_state.notificador.publicar(
        "usuarios.actualizado",
        "usuarios",
        format!("Usuario {} actualizado", updated_user.login),
    );

    HttpResponse::Ok().json(updated_user)
}

pub async fn bloquear_usuario(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    id: web::Path<i64>,
) -> impl Responder {
    if let Err(e) = aut.exigir_permiso("usuarios.bloquear") {
        return e.error_response();
    }
    let user_id = id.into_inner();

    match sqlx::query_as::<_, Usuario>(
        "UPDATE usuarios SET activo = CASE WHEN activo = 1 THEN 0 ELSE 1 END
         WHERE id = $1
         RETURNING id, dni, nombres, apellidos, celular, login, rol_id, activo, creado_en",
    )
    .bind(user_id)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(user)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "usuarios",
                Some(user_id.to_string()),
                auditoria::BLOQUEAR,
                serde_json::json!({ "activo": user.activo }),
            )
            .await;
            app_state.notificador.publicar(
                "usuarios.bloqueado",
                "usuarios",
                format!(
                    "Usuario {} {}",
                    user.login,
                    if user.activo == 1 { "desbloqueado" } else { "bloqueado" }
                ),
            );
            HttpResponse::Ok().json(user)
        }
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Usuario no encontrado" }))
        }
        Err(e) => {
            log::error!("Error al bloquear usuario: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "details": e.to_string()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_usa_inicial_apellido_y_dni() {
        assert_eq!(generar_login("Juan", "Perez", "12345678"), "jperez12345678");
        assert_eq!(
            generar_login("MARIA ELENA", "GOMEZ TORRES", "87654321"),
            "mgomez87654321"
        );
        assert_eq!(generar_login("Ángel", "Núñez", "11112222"), "ánúñez11112222");
    }

    #[test]
    fn login_tolera_campos_vacios() {
        assert_eq!(generar_login("", "", "12345678"), "12345678");
    }

    #[test]
    fn password_generada_es_alfanumerica_de_ocho() {
        let password = generar_password();
        assert_eq!(password.len(), 8);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
