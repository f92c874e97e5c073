use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{web, Error, HttpRequest, HttpResponse, Responder};
use actix_ws::Message;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::modules::login::{self, Autenticado};
use crate::structs::AppState;

const CAPACIDAD_CANAL: usize = 64;

/// Evento que la intranet recibe por websocket cuando otro usuario
/// modifica datos. Se serializa como JSON en un frame de texto.
#[derive(Debug, Clone, Serialize)]
pub struct Notificacion {
    pub evento: String,
    pub entidad: String,
    pub mensaje: String,
    pub fecha: DateTime<Utc>,
}

/// Hub de difusión compartido por todos los workers. Cada conexión
/// websocket se suscribe al canal; publicar nunca bloquea ni falla
/// aunque no haya nadie conectado.
pub struct Notificador {
    canal: broadcast::Sender<Notificacion>,
    conectados: AtomicUsize,
}

impl Notificador {
    pub fn nuevo() -> Self {
        let (canal, _) = broadcast::channel(CAPACIDAD_CANAL);
        Notificador {
            canal,
            conectados: AtomicUsize::new(0),
        }
    }

    pub fn publicar(&self, evento: &str, entidad: &str, mensaje: String) {
        let notificacion = Notificacion {
            evento: evento.to_string(),
            entidad: entidad.to_string(),
            mensaje,
            fecha: Utc::now(),
        };
        // Err solo significa que no hay suscriptores en este momento.
        let _ = self.canal.send(notificacion);
    }

    pub fn suscribir(&self) -> broadcast::Receiver<Notificacion> {
        self.canal.subscribe()
    }

    pub fn conectados(&self) -> usize {
        self.conectados.load(Ordering::Relaxed)
    }

    fn conectar(&self) {
        self.conectados.fetch_add(1, Ordering::Relaxed);
    }

    fn desconectar(&self) {
        self.conectados.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Los navegadores no mandan encabezados en el handshake de websocket,
/// así que el token viaja como parámetro de la URL.
#[derive(Deserialize)]
pub struct ConsultaWs {
    pub token: String,
}

pub async fn ws_notificaciones(
    req: HttpRequest,
    cuerpo: web::Payload,
    app_state: web::Data<AppState>,
    consulta: web::Query<ConsultaWs>,
) -> Result<HttpResponse, Error> {
    let claims = login::validar_token(&consulta.token, &app_state.jwt_secret)?;
    let (respuesta, mut sesion, mut mensajes) = actix_ws::handle(&req, cuerpo)?;

    let mut eventos = app_state.notificador.suscribir();
    app_state.notificador.conectar();
    log::info!(
        "Websocket conectado: {} ({} en línea)",
        claims.login,
        app_state.notificador.conectados()
    );

    actix_web::rt::spawn(async move {
        let motivo = loop {
            tokio::select! {
                mensaje = mensajes.next() => match mensaje {
                    Some(Ok(Message::Ping(datos))) => {
                        if sesion.pong(&datos).await.is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(motivo))) => break motivo,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break None,
                },
                evento = eventos.recv() => match evento {
                    Ok(notificacion) => {
                        let texto = match serde_json::to_string(&notificacion) {
                            Ok(texto) => texto,
                            Err(e) => {
                                log::warn!("No se pudo serializar notificación: {}", e);
                                continue;
                            }
                        };
                        if sesion.text(texto).await.is_err() {
                            break None;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(perdidos)) => {
                        log::warn!(
                            "Websocket de {} perdió {} notificaciones",
                            claims.login,
                            perdidos
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break None,
                },
            }
        };

        let _ = sesion.close(motivo).await;
        app_state.notificador.desconectar();
        log::info!(
            "Websocket desconectado: {} ({} en línea)",
            claims.login,
            app_state.notificador.conectados()
        );
    });

    Ok(respuesta)
}

pub async fn estado_notificaciones(
    app_state: web::Data<AppState>,
    _aut: Autenticado,
) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "conectados": app_state.notificador.conectados()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn publica_a_todos_los_suscriptores() {
        let hub = Notificador::nuevo();
        let mut rx_a = hub.suscribir();
        let mut rx_b = hub.suscribir();

        hub.publicar("mesas.creado", "mesas", "Mesa 000123 registrada".into());

        let recibido = rx_a.recv().await.unwrap();
        assert_eq!(recibido.evento, "mesas.creado");
        assert_eq!(recibido.entidad, "mesas");
        assert_eq!(recibido.mensaje, "Mesa 000123 registrada");

        let recibido = rx_b.recv().await.unwrap();
        assert_eq!(recibido.evento, "mesas.creado");
    }

    #[actix_web::test]
    async fn publicar_sin_suscriptores_no_falla() {
        let hub = Notificador::nuevo();
        hub.publicar("locales.eliminado", "locales", "Local eliminado".into());
        assert_eq!(hub.conectados(), 0);
    }

    #[actix_web::test]
    async fn suscriptor_tardio_no_recibe_eventos_previos() {
        let hub = Notificador::nuevo();
        hub.publicar("roles.creado", "roles", "Rol creado".into());

        let mut rx = hub.suscribir();
        hub.publicar("roles.actualizado", "roles", "Rol actualizado".into());

        let recibido = rx.recv().await.unwrap();
        assert_eq!(recibido.evento, "roles.actualizado");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn contador_de_conexiones() {
        let hub = Notificador::nuevo();
        hub.conectar();
        hub.conectar();
        assert_eq!(hub.conectados(), 2);
        hub.desconectar();
        assert_eq!(hub.conectados(), 1);
    }
}
