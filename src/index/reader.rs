use crate::schema::IndexDescriptor;
use crate::types::Result;

use super::cursor::IndexSeekClient;
use super::query::{IndexQueryConstraints, PropertyIndexQuery};

/// Reader over the contents of one value index.
///
/// A reader observes the index as of its creation; callers that must see
/// concurrently committed entries create a new reader.
pub trait ValueIndexReader: Send {
    /// Runs `query` and positions `client` on the results.
    fn query(
        &self,
        client: &mut dyn IndexSeekClient,
        constraints: IndexQueryConstraints,
        query: &[PropertyIndexQuery],
    ) -> Result<()>;
}

/// Source of fresh index readers.
pub trait IndexReaderFactory: Send + Sync {
    /// Opens a reader over the current contents of `index`.
    fn new_value_index_reader(&self, index: &IndexDescriptor) -> Result<Box<dyn ValueIndexReader>>;
}
