use std::future::{ready, Ready};

use actix_web::{
    error, http::header::AUTHORIZATION, web, Error, FromRequest, HttpRequest, HttpResponse,
    Responder,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

use crate::modules::auditoria;
use crate::structs::AppState;

const HORAS_VIGENCIA_TOKEN: i64 = 4;

// Estructura para recibir los datos del POST (Body)
#[derive(Deserialize)]
pub struct InfoLogin {
    pub login: String,
    pub password: String,
}

// Fila de usuario con credenciales (BD)
#[derive(FromRow)]
struct FilaCredenciales {
    id: i64,
    dni: String,
    nombres: String,
    apellidos: String,
    login: String,
    password: String,
    rol_id: i64,
    activo: i32,
}

// Claims para JWT
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub login: String,
    pub rol: i64,
    pub permisos: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

// Usuario tal como lo ve la intranet (sin password)
#[derive(Serialize)]
struct UsuarioSesion {
    id: i64,
    dni: String,
    nombres: String,
    apellidos: String,
    login: String,
    rol_id: i64,
    permisos: Vec<String>,
}

// Respuesta final
#[derive(Serialize)]
struct RespuestaSesion {
    token: String,
    usuario: UsuarioSesion,
}

pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

fn puede_ingresar(fila: &FilaCredenciales, password: &str) -> bool {
    fila.activo == 1 && fila.password == hash_password(password)
}

pub fn emitir_token(
    secreto: &str,
    usuario_id: i64,
    login: &str,
    rol_id: i64,
    permisos: Vec<String>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let ahora = Utc::now();
    let claims = Claims {
        sub: usuario_id.to_string(),
        login: login.to_string(),
        rol: rol_id,
        permisos,
        exp: (ahora + Duration::hours(HORAS_VIGENCIA_TOKEN)).timestamp() as usize,
        iat: ahora.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secreto.as_bytes()),
    )
}

pub fn validar_token(token: &str, secreto: &str) -> Result<Claims, Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secreto.as_bytes()),
        &Validation::default(),
    )
    .map(|datos| datos.claims)
    .map_err(|_| error::ErrorUnauthorized("Token inválido o expirado"))
}

pub async fn iniciar_sesion(
    app_state: web::Data<AppState>,
    info: web::Json<InfoLogin>,
) -> Result<impl Responder, Error> {
    // 1. Buscar al usuario por login
    let fila = sqlx::query_as::<_, FilaCredenciales>(
        "SELECT id, dni, nombres, apellidos, login, password, rol_id, activo
         FROM usuarios WHERE login = $1",
    )
    .bind(info.login.trim())
    .fetch_optional(&app_state.pool_pg)
    .await
    .map_err(|e| {
        log::error!("Error BD consultando credenciales: {}", e);
        error::ErrorInternalServerError("Error interno")
    })?;

    // 2. Verificar contraseña y estado. Un solo mensaje para todo rechazo:
    // la respuesta no distingue usuario inexistente, contraseña errada ni
    // cuenta bloqueada.
    let fila = match fila {
        Some(fila) if puede_ingresar(&fila, &info.password) => fila,
        _ => return Err(error::ErrorUnauthorized("Usuario o contraseña incorrectos")),
    };

    // 3. Cargar los permisos del rol
    let permisos = sqlx::query_scalar::<_, Vec<String>>("SELECT permisos FROM roles WHERE id = $1")
        .bind(fila.rol_id)
        .fetch_one(&app_state.pool_pg)
        .await
        .map_err(|e| {
            log::error!("Error BD consultando permisos del rol {}: {}", fila.rol_id, e);
            error::ErrorInternalServerError("Error interno")
        })?;

    // 4. Firmar el token usando el secreto del AppState
    let token = emitir_token(
        &app_state.jwt_secret,
        fila.id,
        &fila.login,
        fila.rol_id,
        permisos.clone(),
    )
    .map_err(|e| {
        log::error!("Error creando token: {}", e);
        error::ErrorInternalServerError("Error generando autenticación")
    })?;

    auditoria::registrar(
        &app_state.pool_pg,
        &fila.login,
        "sesiones",
        Some(fila.id.to_string()),
        auditoria::INGRESO,
        serde_json::json!({ "rol_id": fila.rol_id }),
    )
    .await;

    let respuesta = RespuestaSesion {
        token,
        usuario: UsuarioSesion {
            id: fila.id,
            dni: fila.dni,
            nombres: fila.nombres,
            apellidos: fila.apellidos,
            login: fila.login,
            rol_id: fila.rol_id,
            permisos,
        },
    };

    Ok(HttpResponse::Ok().json(&respuesta))
}

/// Extractor que exige un token válido en `Authorization: Bearer ...`.
/// Los handlers que lo declaran quedan protegidos sin más plumbing.
pub struct Autenticado {
    pub claims: Claims,
}

impl Autenticado {
    pub fn login(&self) -> &str {
        &self.claims.login
    }

    pub fn tiene_permiso(&self, permiso: &str) -> bool {
        self.claims
            .permisos
            .iter()
            .any(|p| p == permiso || p == "*")
    }

    pub fn exigir_permiso(&self, permiso: &str) -> Result<(), Error> {
        if self.tiene_permiso(permiso) {
            Ok(())
        } else {
            Err(error::ErrorForbidden(format!(
                "El rol no tiene el permiso {}",
                permiso
            )))
        }
    }
}

impl FromRequest for Autenticado {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(autenticar(req))
    }
}

fn autenticar(req: &HttpRequest) -> Result<Autenticado, Error> {
    let app_state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| error::ErrorInternalServerError("Estado de la aplicación no disponible"))?;
    let encabezado = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|valor| valor.to_str().ok())
        .ok_or_else(|| error::ErrorUnauthorized("Falta el encabezado Authorization"))?;
    let token = encabezado
        .strip_prefix("Bearer ")
        .ok_or_else(|| error::ErrorUnauthorized("Se esperaba un token Bearer"))?;
    let claims = validar_token(token, &app_state.jwt_secret)?;
    Ok(Autenticado { claims })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_es_estable_y_hexadecimal() {
        let hash = hash_password("cambiame123");
        assert_eq!(hash, hash_password("cambiame123"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, hash_password("otra"));
    }

    #[test]
    fn usuario_bloqueado_no_ingresa_ni_con_contrasena_correcta() {
        let fila = FilaCredenciales {
            id: 7,
            dni: "12345678".into(),
            nombres: "JUAN".into(),
            apellidos: "PEREZ".into(),
            login: "jperez".into(),
            password: hash_password("secreta123"),
            rol_id: 2,
            activo: 1,
        };
        assert!(puede_ingresar(&fila, "secreta123"));
        assert!(!puede_ingresar(&fila, "otra"));

        let bloqueado = FilaCredenciales { activo: 0, ..fila };
        assert!(!puede_ingresar(&bloqueado, "secreta123"));
    }

    #[test]
    fn token_ida_y_vuelta() {
        let token = emitir_token("secreto", 7, "jperez", 2, vec!["usuarios.ver".into()]).unwrap();
        let claims = validar_token(&token, "secreto").unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.login, "jperez");
        assert_eq!(claims.rol, 2);
        assert_eq!(claims.permisos, vec!["usuarios.ver".to_string()]);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_con_otro_secreto_se_rechaza() {
        let token = emitir_token("secreto", 7, "jperez", 2, vec![]).unwrap();
        assert!(validar_token(&token, "distinto").is_err());
        assert!(validar_token("no-es-un-jwt", "secreto").is_err());
    }

    #[test]
    fn permisos_aceptan_comodin() {
        let claims = Claims {
            sub: "1".into(),
            login: "admin".into(),
            rol: 1,
            permisos: vec!["*".into()],
            exp: 0,
            iat: 0,
        };
        let aut = Autenticado { claims };
        assert!(aut.tiene_permiso("usuarios.crear"));
        assert!(aut.exigir_permiso("roles.eliminar").is_ok());

        let claims = Claims {
            sub: "2".into(),
            login: "digitador".into(),
            rol: 3,
            permisos: vec!["mesas.ver".into()],
            exp: 0,
            iat: 0,
        };
        let aut = Autenticado { claims };
        assert!(aut.tiene_permiso("mesas.ver"));
        assert!(aut.exigir_permiso("usuarios.crear").is_err());
    }
}
