use anyhow::Result;

mod api;
mod db;
mod schema;
mod utils;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let db = db::Db::connect()?;
    // schema reconciliation must finish before we accept traffic
    db.init()?;

    api::new_http_server(db).await?;
    Ok(())
}
