use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::postgres::PgPool;
use std::env;
use std::path::PathBuf;

mod structs {
    use std::path::PathBuf;

    use sqlx::postgres::PgPool;

    use crate::modules::notificaciones::Notificador;

    pub struct AppState {
        pub pool_pg: PgPool,
        pub jwt_secret: String,
        pub dir_archivos: PathBuf,
        pub notificador: Notificador,
    }
}

mod modules {
    pub mod auditoria;
    pub mod candidatos;
    pub mod importar;
    pub mod locales;
    pub mod login;
    pub mod mesas;
    pub mod notificaciones;
    pub mod paginacion;
    pub mod personeros;
    pub mod roles;
    pub mod ubigeo;
    pub mod usuarios;

    pub use auditoria::listar_auditoria;
    pub use candidatos::{
        actualizar_candidato, crear_candidato, eliminar_candidato, listar_candidatos,
        obtener_candidato, subir_foto_candidato,
    };
    pub use locales::{
        actualizar_local, crear_local, eliminar_local, importar_locales, listar_locales,
        obtener_local,
    };
    pub use login::iniciar_sesion;
    pub use mesas::{
        actualizar_mesa, crear_mesa, eliminar_mesa, importar_mesas, listar_mesas, obtener_mesa,
    };
    pub use notificaciones::{estado_notificaciones, ws_notificaciones};
    pub use personeros::{
        actualizar_personero, crear_personero, eliminar_personero, importar_personeros,
        listar_personeros, obtener_personero,
    };
    pub use roles::{actualizar_rol, crear_rol, eliminar_rol, listar_roles};
    pub use ubigeo::{
        crear_departamento, crear_distrito, crear_provincia, listar_departamentos,
        listar_distritos, listar_provincias,
    };
    pub use usuarios::{actualizar_usuario, bloquear_usuario, crear_usuario, listar_usuarios};
}

async fn salud() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "estado": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let allowed_origin =
        env::var("ALLOWED_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let direccion = env::var("HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    let url_pg = env::var("PG_URL").expect("Variable PG_URL faltante");
    let jwt_secret = env::var("JWT_SECRET").expect("Variable JWT_SECRET faltante");
    let dir_archivos =
        PathBuf::from(env::var("DIR_ARCHIVOS").unwrap_or_else(|_| "archivos".to_string()));

    let pool_pg = PgPool::connect(&url_pg).await.expect("Error conectando a BD");
    sqlx::migrate!()
        .run(&pool_pg)
        .await
        .expect("Error aplicando migraciones");
    std::fs::create_dir_all(dir_archivos.join("candidatos"))
        .expect("Error creando DIR_ARCHIVOS");

    // Un solo estado para todos los workers: el canal de notificaciones y su
    // contador de conexiones deben ser los mismos en todo el proceso.
    let estado = web::Data::new(structs::AppState {
        pool_pg,
        jwt_secret,
        dir_archivos: dir_archivos.clone(),
        notificador: modules::notificaciones::Notificador::nuevo(),
    });

    println!("\n🗳️  Backend electoral iniciado");
    println!("========================================");
    println!("📡 Servidor: http://{}", direccion);
    println!("🔐 JWT: Configurado");
    println!("🌐 CORS: {}", allowed_origin);
    println!("📁 Archivos: {}", dir_archivos.display());

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allowed_origin(allowed_origin.as_str())
                    .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600)
                    .supports_credentials(),
            )
            .app_data(estado.clone())
            .service(
                web::scope("/api")
                    .route("/salud", web::get().to(salud))
                    .route("/login", web::post().to(modules::iniciar_sesion))
                    .route("/usuarios", web::get().to(modules::listar_usuarios))
                    .route("/usuarios", web::post().to(modules::crear_usuario))
                    .route("/usuarios/{id}", web::put().to(modules::actualizar_usuario))
                    .route("/usuarios/{id}/bloquear", web::put().to(modules::bloquear_usuario))
                    .route("/roles", web::get().to(modules::listar_roles))
                    .route("/roles", web::post().to(modules::crear_rol))
                    .route("/roles/{id}", web::put().to(modules::actualizar_rol))
                    .route("/roles/{id}", web::delete().to(modules::eliminar_rol))
                    .route("/ubigeo/departamentos", web::get().to(modules::listar_departamentos))
                    .route("/ubigeo/departamentos", web::post().to(modules::crear_departamento))
                    .route("/ubigeo/provincias/{departamento}", web::get().to(modules::listar_provincias))
                    .route("/ubigeo/provincias", web::post().to(modules::crear_provincia))
                    .route("/ubigeo/distritos/{provincia}", web::get().to(modules::listar_distritos))
                    .route("/ubigeo/distritos", web::post().to(modules::crear_distrito))
                    .route("/locales", web::get().to(modules::listar_locales))
                    .route("/locales", web::post().to(modules::crear_local))
                    .route("/locales/importar", web::post().to(modules::importar_locales))
                    .route("/locales/{id}", web::get().to(modules::obtener_local))
                    .route("/locales/{id}", web::put().to(modules::actualizar_local))
                    .route("/locales/{id}", web::delete().to(modules::eliminar_local))
                    .route("/mesas", web::get().to(modules::listar_mesas))
                    .route("/mesas", web::post().to(modules::crear_mesa))
                    .route("/mesas/importar", web::post().to(modules::importar_mesas))
                    .route("/mesas/{id}", web::get().to(modules::obtener_mesa))
                    .route("/mesas/{id}", web::put().to(modules::actualizar_mesa))
                    .route("/mesas/{id}", web::delete().to(modules::eliminar_mesa))
                    .route("/personeros", web::get().to(modules::listar_personeros))
                    .route("/personeros", web::post().to(modules::crear_personero))
                    .route("/personeros/importar", web::post().to(modules::importar_personeros))
                    .route("/personeros/{id}", web::get().to(modules::obtener_personero))
                    .route("/personeros/{id}", web::put().to(modules::actualizar_personero))
                    .route("/personeros/{id}", web::delete().to(modules::eliminar_personero))
                    .route("/candidatos", web::get().to(modules::listar_candidatos))
                    .route("/candidatos", web::post().to(modules::crear_candidato))
                    .route("/candidatos/{id}", web::get().to(modules::obtener_candidato))
                    .route("/candidatos/{id}", web::put().to(modules::actualizar_candidato))
                    .route("/candidatos/{id}", web::delete().to(modules::eliminar_candidato))
                    .route("/candidatos/{id}/foto", web::post().to(modules::subir_foto_candidato))
                    .route("/auditoria", web::get().to(modules::listar_auditoria))
                    .route("/notificaciones/estado", web::get().to(modules::estado_notificaciones)),
            )
            .route("/ws/notificaciones", web::get().to(modules::ws_notificaciones))
            .service(actix_files::Files::new("/archivos", dir_archivos.clone()))
    })
    .bind(direccion.as_str())?
    .run()
    .await
}
