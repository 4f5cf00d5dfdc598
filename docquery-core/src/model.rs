//! The mapped-object contract.
//!
//! A [`Model`] is any serde type that knows which collection it lives in and which field is its
//! primary key. That is all the query layer needs from a persistence framework.

use bson::{Document, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::{coerce::ID_FIELD, error::QueryResult};

/// A type mapped onto one collection.
///
/// # Example
///
/// ```ignore
/// use docquery::model::Model;
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub name: String,
/// }
///
/// impl Model for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the name of the collection this model belongs to.
    fn collection_name() -> &'static str;

    /// Name of the primary key field. Values compared against it are coerced to ObjectIds.
    fn key_name() -> &'static str {
        ID_FIELD
    }
}

/// Conversion helpers, implemented for every [`Model`].
pub trait ModelExt: Model {
    /// Converts this model to a BSON document for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not serialize to a document.
    fn to_document(&self) -> QueryResult<Document>;

    /// Creates a model from a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_document(document: Document) -> QueryResult<Self>;

    fn to_json(&self) -> QueryResult<Value>;

    fn from_json(value: Value) -> QueryResult<Self>;
}

impl<M: Model> ModelExt for M {
    fn to_document(&self) -> QueryResult<Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: Document) -> QueryResult<Self> {
        Ok(deserialize_from_document(document)?)
    }

    fn to_json(&self) -> QueryResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> QueryResult<Self> {
        Ok(from_value(value)?)
    }
}
