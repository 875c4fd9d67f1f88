//! MongoDB implementation of the conversation source.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::StreamExt;
use mongodb::{
    options::{ChangeStreamOptions, ClientOptions, FullDocumentType},
    Client as MongoClient, Collection,
};
use sync_core::{
    ConversationDocument, ConversationSource, EntityCounts, PageStream, SyncError, SyncResult,
};

use crate::change_stream::MongoChangeFeed;
use crate::checkpoint::decode_resume_token;
use crate::decode::decode_conversation;

const DEFAULT_DATABASE: &str = "chatdb";

/// Source database connection options (library type without clap)
#[derive(Clone, Debug)]
pub struct SourceOpts {
    pub source_uri: String,
    /// Database name; falls back to the database in the URI, then `chatdb`.
    pub source_database: Option<String>,
    pub collection: String,
}

/// Conversation collection in a MongoDB replica set.
#[derive(Clone, Debug)]
pub struct MongoConversationSource {
    client: MongoClient,
    database: String,
    collection: Collection<Document>,
}

impl MongoConversationSource {
    /// Connect and verify the deployment is reachable.
    pub async fn connect(opts: &SourceOpts) -> SyncResult<Self> {
        tracing::debug!("Parsing MongoDB connection options");
        let mut mongo_options = ClientOptions::parse(&opts.source_uri)
            .await
            .map_err(|e| SyncError::Setup(format!("Invalid MongoDB connection string: {e}")))?;
        // Fail fast on unreachable deployments instead of hanging
        mongo_options.connect_timeout = Some(Duration::from_secs(10));
        mongo_options.server_selection_timeout = Some(Duration::from_secs(10));

        let database = opts
            .source_database
            .clone()
            .or_else(|| mongo_options.default_database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let client = MongoClient::with_options(mongo_options)
            .map_err(|e| SyncError::Setup(format!("Failed to create MongoDB client: {e}")))?;

        client
            .database(&database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SyncError::Setup(format!("MongoDB is unreachable: {e}")))?;

        tracing::info!(
            "Connected to MongoDB database '{}', collection '{}'",
            database,
            opts.collection
        );

        let collection = client
            .database(&database)
            .collection::<Document>(&opts.collection);

        Ok(Self {
            client,
            database,
            collection,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }
}

#[async_trait]
impl ConversationSource for MongoConversationSource {
    type Feed = MongoChangeFeed;

    async fn open_change_feed(&self, resume_after: Option<Vec<u8>>) -> SyncResult<MongoChangeFeed> {
        let mut options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();

        if let Some(bytes) = resume_after {
            let token = decode_resume_token(&bytes).map_err(|e| SyncError::Setup(e.to_string()))?;
            options.resume_after = Some(token);
            tracing::info!("Resuming change stream from saved checkpoint");
        }

        let stream = self
            .collection
            .watch()
            .with_options(options)
            .await
            .map_err(|e| SyncError::Setup(format!("Failed to open change stream: {e}")))?;

        Ok(MongoChangeFeed::new(stream))
    }

    async fn snapshot_pages(&self, batch_size: usize) -> SyncResult<PageStream> {
        let batch_size = batch_size.max(1);
        let cursor = self
            .collection
            .find(doc! {})
            .batch_size(u32::try_from(batch_size).unwrap_or(u32::MAX))
            .await
            .map_err(|e| SyncError::Source(format!("Failed to open snapshot cursor: {e}")))?;

        let pages = cursor.chunks(batch_size).map(|chunk| {
            chunk
                .into_iter()
                .map(|result| {
                    let document = result
                        .map_err(|e| SyncError::Source(format!("Snapshot cursor error: {e}")))?;
                    decode_conversation(&document)
                })
                .collect::<SyncResult<Vec<ConversationDocument>>>()
        });

        Ok(pages.boxed())
    }

    async fn counts(&self) -> SyncResult<EntityCounts> {
        let conversations = self
            .collection
            .count_documents(doc! {})
            .await
            .map_err(|e| SyncError::Source(format!("Failed to count conversations: {e}")))?;

        let pipeline = vec![doc! {
            "$group": {
                "_id": Bson::Null,
                "total": {
                    "$sum": {
                        "$cond": [
                            { "$isArray": "$messages" },
                            { "$size": "$messages" },
                            0
                        ]
                    }
                }
            }
        }];

        let mut cursor = self
            .collection
            .aggregate(pipeline)
            .await
            .map_err(|e| SyncError::Source(format!("Failed to count messages: {e}")))?;

        let messages = match cursor.next().await {
            Some(result) => {
                let row =
                    result.map_err(|e| SyncError::Source(format!("Failed to count messages: {e}")))?;
                match row.get("total") {
                    Some(Bson::Int32(n)) => *n as u64,
                    Some(Bson::Int64(n)) => *n as u64,
                    Some(Bson::Double(n)) => *n as u64,
                    _ => 0,
                }
            }
            None => 0,
        };

        Ok(EntityCounts {
            conversations,
            messages,
        })
    }
}
