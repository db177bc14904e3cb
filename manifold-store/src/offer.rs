//! Application offer records.

use sqlx::Row;

use manifold_core::Result;

use crate::db::Database;
use crate::error::SqlxErrorExt;

/// An application offer exposed by a model. The URL is unique across the
/// whole plane; the name only within its model.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ApplicationOffer {
    pub uuid: String,
    /// Surrogate id of the owning model row.
    pub model_id: String,
    pub name: String,
    pub url: String,
}

impl ApplicationOffer {
    pub fn tag(&self) -> manifold_core::Tag {
        manifold_core::Tag::application_offer(&self.uuid)
    }
}

fn offer_from_row(row: &sqlx::any::AnyRow, op: &str) -> Result<ApplicationOffer> {
    Ok(ApplicationOffer {
        uuid: row.try_get("uuid").map_err(|e| e.into_store_error(op))?,
        model_id: row.try_get("model_id").map_err(|e| e.into_store_error(op))?,
        name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
        url: row.try_get("url").map_err(|e| e.into_store_error(op))?,
    })
}

impl Database {
    /// Create an offer; `already-exists` on a duplicate URL or a duplicate
    /// name within the model.
    pub async fn add_application_offer(&self, offer: &ApplicationOffer) -> Result<()> {
        const OP: &str = "add-application-offer";
        let pool = self.pool(OP)?;
        sqlx::query(
            "INSERT INTO application_offers (uuid, model_id, name, url) VALUES ($1, $2, $3, $4)",
        )
        .bind(&offer.uuid)
        .bind(&offer.model_id)
        .bind(&offer.name)
        .bind(&offer.url)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    pub async fn get_application_offer(&self, uuid: &str) -> Result<ApplicationOffer> {
        const OP: &str = "get-application-offer";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT uuid, model_id, name, url FROM application_offers WHERE uuid = $1",
        )
        .bind(uuid)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        offer_from_row(&row, OP)
    }

    pub async fn get_application_offer_by_url(&self, url: &str) -> Result<ApplicationOffer> {
        const OP: &str = "get-application-offer";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT uuid, model_id, name, url FROM application_offers WHERE url = $1",
        )
        .bind(url)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        offer_from_row(&row, OP)
    }

    pub async fn delete_application_offer(&self, uuid: &str) -> Result<()> {
        const OP: &str = "delete-application-offer";
        let pool = self.pool(OP)?;
        let result = sqlx::query("DELETE FROM application_offers WHERE uuid = $1")
            .bind(uuid)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(manifold_core::Error::not_found(format!("offer {uuid} not found")).op(OP));
        }
        Ok(())
    }

    /// Offers owned by a model row, ordered by name.
    pub async fn offers_for_model(&self, model_id: &str) -> Result<Vec<ApplicationOffer>> {
        const OP: &str = "offers-for-model";
        let pool = self.pool(OP)?;
        let rows = sqlx::query(
            "SELECT uuid, model_id, name, url FROM application_offers
             WHERE model_id = $1 ORDER BY name ASC",
        )
        .bind(model_id)
        .fetch_all(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(|row| offer_from_row(row, OP)).collect()
    }
}
