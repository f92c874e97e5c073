use std::collections::HashSet;

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::modules::auditoria;
use crate::modules::login::Autenticado;
use crate::modules::notificaciones::Notificador;
use crate::structs::AppState;

pub const LARGO_DEPARTAMENTO: usize = 2;
pub const LARGO_PROVINCIA: usize = 4;
pub const LARGO_DISTRITO: usize = 6;

#[derive(FromRow, Serialize, Debug)]
pub struct Departamento {
    pub codigo: String,
    pub nombre: String,
}

#[derive(FromRow, Serialize, Debug)]
pub struct Provincia {
    pub codigo: String,
    pub nombre: String,
    pub codigo_departamento: String,
}

#[derive(FromRow, Serialize, Debug)]
pub struct Distrito {
    pub codigo: String,
    pub nombre: String,
    pub codigo_provincia: String,
}

pub fn es_codigo(valor: &str, largo: usize) -> bool {
    valor.len() == largo && valor.chars().all(|c| c.is_ascii_digit())
}

/// Códigos vigentes cargados en memoria de una sola vez. Las importaciones
/// validan cientos de filas contra este índice sin tocar la BD por fila.
pub struct IndiceUbigeo {
    departamentos: HashSet<String>,
    provincias: HashSet<String>,
    distritos: HashSet<String>,
}

impl IndiceUbigeo {
    pub async fn cargar(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let departamentos = sqlx::query_scalar::<_, String>("SELECT codigo FROM departamentos")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
        let provincias = sqlx::query_scalar::<_, String>("SELECT codigo FROM provincias")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
        let distritos = sqlx::query_scalar::<_, String>("SELECT codigo FROM distritos")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
        Ok(IndiceUbigeo {
            departamentos,
            provincias,
            distritos,
        })
    }

    #[cfg(test)]
    pub fn de_codigos(distritos: &[&str], provincias_extra: &[&str]) -> Self {
        let distritos: HashSet<String> = distritos.iter().map(|c| c.to_string()).collect();
        let mut provincias: HashSet<String> =
            distritos.iter().map(|c| c[..LARGO_PROVINCIA].to_string()).collect();
        provincias.extend(provincias_extra.iter().map(|c| c.to_string()));
        let departamentos = provincias
            .iter()
            .map(|c| c[..LARGO_DEPARTAMENTO].to_string())
            .collect();
        IndiceUbigeo {
            departamentos,
            provincias,
            distritos,
        }
    }

    pub fn existe_departamento(&self, codigo: &str) -> bool {
        self.departamentos.contains(codigo)
    }

    pub fn existe_provincia(&self, codigo: &str) -> bool {
        self.provincias.contains(codigo)
    }

    pub fn existe_distrito(&self, codigo: &str) -> bool {
        self.distritos.contains(codigo)
    }

    /// Valida un ubigeo de distrito revisando toda la cadena, para poder
    /// decir exactamente qué nivel falta.
    pub fn validar_cadena(&self, codigo: &str) -> Result<(), String> {
        if !es_codigo(codigo, LARGO_DISTRITO) {
            return Err(format!("el ubigeo {} debe tener 6 dígitos", codigo));
        }
        if !self.existe_departamento(&codigo[..LARGO_DEPARTAMENTO]) {
            return Err(format!(
                "el departamento {} no existe",
                &codigo[..LARGO_DEPARTAMENTO]
            ));
        }
        if !self.existe_provincia(&codigo[..LARGO_PROVINCIA]) {
            return Err(format!(
                "la provincia {} no existe",
                &codigo[..LARGO_PROVINCIA]
            ));
        }
        if !self.existe_distrito(codigo) {
            return Err(format!("el distrito {} no existe", codigo));
        }
        Ok(())
    }
}

pub async fn listar_departamentos(app_state: web::Data<AppState>, _aut: Autenticado) -> impl Responder {
    match sqlx::query_as::<_, Departamento>(
        "SELECT codigo, nombre FROM departamentos ORDER BY codigo",
    )
    .fetch_all(&app_state.pool_pg)
    .await
    {
        Ok(departamentos) => HttpResponse::Ok().json(departamentos),
        Err(e) => {
            log::error!("Error BD listando departamentos: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error consultando departamentos",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn listar_provincias(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    ruta: web::Path<String>,
) -> impl Responder {
    let codigo_departamento = ruta.into_inner();
    if !es_codigo(&codigo_departamento, LARGO_DEPARTAMENTO) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El código de departamento debe tener 2 dígitos" }));
    }
    match sqlx::query_as::<_, Provincia>(
        "SELECT codigo, nombre, codigo_departamento FROM provincias
         WHERE codigo_departamento = $1 ORDER BY codigo",
    )
    .bind(&codigo_departamento)
    .fetch_all(&app_state.pool_pg)
    .await
    {
        Ok(provincias) => HttpResponse::Ok().json(provincias),
        Err(e) => {
            log::error!("Error BD listando provincias: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error consultando provincias",
                "details": e.to_string()
            }))
        }
    }
}

pub async fn listar_distritos(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    ruta: web::Path<String>,
) -> impl Responder {
    let codigo_provincia = ruta.into_inner();
    if !es_codigo(&codigo_provincia, LARGO_PROVINCIA) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El código de provincia debe tener 4 dígitos" }));
    }
    match sqlx::query_as::<_, Distrito>(
        "SELECT codigo, nombre, codigo_provincia FROM distritos
         WHERE codigo_provincia = $1 ORDER BY codigo",
    )
    .bind(&codigo_provincia)
    .fetch_all(&app_state.pool_pg)
    .await
    {
        Ok(distritos) => HttpResponse::Ok().json(distritos),
        Err(e) => {
            log::error!("Error BD listando distritos: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error consultando distritos",
                "details": e.to_string()
            }))
        }
    }
}

fn publicar_alta(notificador: &Notificador, entidad: &str, descripcion: String) {
    notificador.publicar(&format!("{}.creado", entidad), entidad, descripcion);
}

#[derive(Deserialize)]
pub struct DepartamentoNuevo {
    pub codigo: String,
    pub nombre: String,
}

pub async fn crear_departamento(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    datos: web::Json<DepartamentoNuevo>,
) -> impl Responder {
    let codigo = datos.codigo.trim().to_string();
    let nombre = datos.nombre.trim().to_string();
    if !es_codigo(&codigo, LARGO_DEPARTAMENTO) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El código de departamento debe tener 2 dígitos" }));
    }
    if nombre.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "El nombre es obligatorio" }));
    }

    match sqlx::query_as::<_, Departamento>(
        "INSERT INTO departamentos (codigo, nombre) VALUES ($1, $2)
         ON CONFLICT (codigo) DO NOTHING
         RETURNING codigo, nombre",
    )
    .bind(&codigo)
    .bind(&nombre)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(departamento)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "departamentos",
                Some(departamento.codigo.clone()),
                auditoria::CREAR,
                serde_json::json!({ "nombre": departamento.nombre }),
            )
            .await;
            publicar_alta(
                &app_state.notificador,
                "departamentos",
                format!("Departamento {} {} registrado", departamento.codigo, departamento.nombre),
            );
            HttpResponse::Created().json(departamento)
        }
        Ok(None) => HttpResponse::Conflict()
            .json(serde_json::json!({ "error": format!("El departamento {} ya existe", codigo) })),
        Err(e) => {
            log::error!("Error BD creando departamento: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error creando departamento",
                "details": e.to_string()
            }))
        }
    }
}

#[derive(Deserialize)]
pub struct ProvinciaNueva {
    pub codigo: String,
    pub nombre: String,
}

pub async fn crear_provincia(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    datos: web::Json<ProvinciaNueva>,
) -> impl Responder {
    let codigo = datos.codigo.trim().to_string();
    let nombre = datos.nombre.trim().to_string();
    if !es_codigo(&codigo, LARGO_PROVINCIA) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El código de provincia debe tener 4 dígitos" }));
    }
    if nombre.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "El nombre es obligatorio" }));
    }
    let codigo_departamento = codigo[..LARGO_DEPARTAMENTO].to_string();

    let existe_padre = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM departamentos WHERE codigo = $1)",
    )
    .bind(&codigo_departamento)
    .fetch_one(&app_state.pool_pg)
    .await;
    match existe_padre {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::BadRequest().json(
                serde_json::json!({ "error": format!("El departamento {} no existe", codigo_departamento) }),
            )
        }
        Err(e) => {
            log::error!("Error BD verificando departamento: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error creando provincia",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Provincia>(
        "INSERT INTO provincias (codigo, nombre, codigo_departamento) VALUES ($1, $2, $3)
         ON CONFLICT (codigo) DO NOTHING
         RETURNING codigo, nombre, codigo_departamento",
    )
    .bind(&codigo)
    .bind(&nombre)
    .bind(&codigo_departamento)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(provincia)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "provincias",
                Some(provincia.codigo.clone()),
                auditoria::CREAR,
                serde_json::json!({ "nombre": provincia.nombre }),
            )
            .await;
            publicar_alta(
                &app_state.notificador,
                "provincias",
                format!("Provincia {} {} registrada", provincia.codigo, provincia.nombre),
            );
            HttpResponse::Created().json(provincia)
        }
        Ok(None) => HttpResponse::Conflict()
            .json(serde_json::json!({ "error": format!("La provincia {} ya existe", codigo) })),
        Err(e) => {
            log::error!("Error BD creando provincia: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error creando provincia",
                "details": e.to_string()
            }))
        }
    }
}

#[derive(Deserialize)]
pub struct DistritoNuevo {
    pub codigo: String,
    pub nombre: String,
}

pub async fn crear_distrito(
    app_state: web::Data<AppState>,
    aut: Autenticado,
    datos: web::Json<DistritoNuevo>,
) -> impl Responder {
    let codigo = datos.codigo.trim().to_string();
    let nombre = datos.nombre.trim().to_string();
    if !es_codigo(&codigo, LARGO_DISTRITO) {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "El código de distrito debe tener 6 dígitos" }));
    }
    if nombre.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "El nombre es obligatorio" }));
    }
    let codigo_provincia = codigo[..LARGO_PROVINCIA].to_string();

    let existe_padre = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM provincias WHERE codigo = $1)",
    )
    .bind(&codigo_provincia)
    .fetch_one(&app_state.pool_pg)
    .await;
    match existe_padre {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": format!("La provincia {} no existe", codigo_provincia) }))
        }
        Err(e) => {
            log::error!("Error BD verificando provincia: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error creando distrito",
                "details": e.to_string()
            }));
        }
    }

    match sqlx::query_as::<_, Distrito>(
        "INSERT INTO distritos (codigo, nombre, codigo_provincia) VALUES ($1, $2, $3)
         ON CONFLICT (codigo) DO NOTHING
         RETURNING codigo, nombre, codigo_provincia",
    )
    .bind(&codigo)
    .bind(&nombre)
    .bind(&codigo_provincia)
    .fetch_optional(&app_state.pool_pg)
    .await
    {
        Ok(Some(distrito)) => {
            auditoria::registrar(
                &app_state.pool_pg,
                aut.login(),
                "distritos",
                Some(distrito.codigo.clone()),
                auditoria::CREAR,
                serde_json::json!({ "nombre": distrito.nombre }),
            )
            .await;
            publicar_alta(
                &app_state.notificador,
                "distritos",
                format!("Distrito {} {} registrado", distrito.codigo, distrito.nombre),
            );
            HttpResponse::Created().json(distrito)
        }
        Ok(None) => HttpResponse::Conflict()
            .json(serde_json::json!({ "error": format!("El distrito {} ya existe", codigo) })),
        Err(e) => {
            log::error!("Error BD creando distrito: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error creando distrito",
                "details": e.to_string()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codigo_exige_largo_y_digitos() {
        assert!(es_codigo("14", LARGO_DEPARTAMENTO));
        assert!(es_codigo("1401", LARGO_PROVINCIA));
        assert!(es_codigo("140101", LARGO_DISTRITO));
        assert!(!es_codigo("1401", LARGO_DISTRITO));
        assert!(!es_codigo("14010A", LARGO_DISTRITO));
        assert!(!es_codigo("", LARGO_DEPARTAMENTO));
    }

    #[test]
    fn cadena_valida_pasa() {
        let indice = IndiceUbigeo::de_codigos(&["140101", "140102"], &[]);
        assert!(indice.validar_cadena("140101").is_ok());
        assert!(indice.validar_cadena("140102").is_ok());
    }

    #[test]
    fn cadena_reporta_el_nivel_que_falta() {
        let indice = IndiceUbigeo::de_codigos(&["140101"], &[]);

        let error = indice.validar_cadena("990101").unwrap_err();
        assert!(error.contains("departamento 99"));

        let error = indice.validar_cadena("149901").unwrap_err();
        assert!(error.contains("provincia 1499"));

        let error = indice.validar_cadena("140199").unwrap_err();
        assert!(error.contains("distrito 140199"));

        let error = indice.validar_cadena("14").unwrap_err();
        assert!(error.contains("6 dígitos"));
    }

    #[actix_web::test]
    async fn el_alta_publica_su_evento() {
        let hub = Notificador::nuevo();
        let mut rx = hub.suscribir();

        publicar_alta(&hub, "departamentos", "Departamento 01 AMAZONAS registrado".into());

        let recibido = rx.recv().await.unwrap();
        assert_eq!(recibido.evento, "departamentos.creado");
        assert_eq!(recibido.entidad, "departamentos");
        assert_eq!(recibido.mensaje, "Departamento 01 AMAZONAS registrado");
    }
}
