use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::modules::login::Autenticado;
use crate::modules::paginacion::{self, ListaPaginada};
use crate::structs::AppState;

pub const CREAR: &str = "CREAR";
pub const ACTUALIZAR: &str = "ACTUALIZAR";
pub const ELIMINAR: &str = "ELIMINAR";
pub const BLOQUEAR: &str = "BLOQUEAR";
pub const IMPORTAR: &str = "IMPORTAR";
pub const INGRESO: &str = "INGRESO";

#[derive(FromRow, Serialize, Debug)]
pub struct RegistroAuditoria {
    pub id: i64,
    pub usuario: String,
    pub entidad: String,
    pub entidad_id: Option<String>,
    pub accion: String,
    pub detalle: Option<serde_json::Value>,
    pub fecha: DateTime<Utc>,
}

/// Deja constancia de una acción administrativa. Nunca hace fallar la
/// operación que la origina: si la BD rechaza el insert solo se registra
/// en el log del servidor.
pub async fn registrar(
    pool: &PgPool,
    usuario: &str,
    entidad: &str,
    entidad_id: Option<String>,
    accion: &str,
    detalle: serde_json::Value,
) {
    let resultado = sqlx::query(
        "INSERT INTO auditoria (usuario, entidad, entidad_id, accion, detalle)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(usuario)
    .bind(entidad)
    .bind(&entidad_id)
    .bind(accion)
    .bind(&detalle)
    .execute(pool)
    .await;

    if let Err(e) = resultado {
        log::warn!(
            "No se pudo registrar auditoría ({} {} {:?}): {}",
            accion,
            entidad,
            entidad_id,
            e
        );
    }
}

#[derive(Deserialize)]
pub struct FiltrosAuditoria {
    pub pagina: Option<i64>,
    pub limite: Option<i64>,
    pub usuario: Option<String>,
    pub entidad: Option<String>,
    pub accion: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}

fn aplicar_filtros(consulta: &mut QueryBuilder<Postgres>, filtros: &FiltrosAuditoria) {
    if let Some(usuario) = filtros.usuario.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        consulta.push(" AND usuario = ").push_bind(usuario.to_string());
    }
    if let Some(entidad) = filtros.entidad.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        consulta.push(" AND entidad = ").push_bind(entidad.to_string());
    }
    if let Some(accion) = filtros.accion.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        consulta.push(" AND accion = ").push_bind(accion.to_uppercase());
    }
    if let Some(desde) = filtros.desde {
        consulta.push(" AND fecha >= ").push_bind(desde);
    }
    if let Some(hasta) = filtros.hasta {
        // Intervalo semiabierto para incluir el día `hasta` completo.
        if let Some(siguiente) = hasta.checked_add_days(Days::new(1)) {
            consulta.push(" AND fecha < ").push_bind(siguiente);
        }
    }
}

pub async fn listar_auditoria(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
    filtros: web::Query<FiltrosAuditoria>,
) -> impl Responder {
    let pagina = paginacion::pagina(filtros.pagina);
    let limite = paginacion::limite(filtros.limite);

    let mut consulta: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM auditoria WHERE 1=1");
    aplicar_filtros(&mut consulta, &filtros);
    let total = match consulta
        .build_query_scalar::<i64>()
        .fetch_one(&app_state.pool_pg)
        .await
    {
        Ok(total) => total,
        Err(e) => {
            log::error!("Error BD contando auditoría: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error consultando auditoría",
                "details": e.to_string()
            }));
        }
    };

    let mut consulta: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, usuario, entidad, entidad_id, accion, detalle, fecha
         FROM auditoria WHERE 1=1",
    );
    aplicar_filtros(&mut consulta, &filtros);
    consulta
        .push(" ORDER BY fecha DESC, id DESC LIMIT ")
        .push_bind(limite)
        .push(" OFFSET ")
        .push_bind(paginacion::offset(pagina, limite));

    match consulta
        .build_query_as::<RegistroAuditoria>()
        .fetch_all(&app_state.pool_pg)
        .await
    {
        Ok(registros) => {
            HttpResponse::Ok().json(ListaPaginada::nueva(registros, total, pagina, limite))
        }
        Err(e) => {
            log::error!("Error BD listando auditoría: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Error consultando auditoría",
                "details": e.to_string()
            }))
        }
    }
}
