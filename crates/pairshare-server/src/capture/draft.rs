use image::DynamicImage;

use super::imaging::{self, PreparedImage};
use super::moment::MomentCell;
use crate::error::AppResult;

/// Transient state of an expense being captured.
///
/// Owns the prepared photo buffers until they are either cleared or moved
/// into a submission.
#[derive(Debug)]
pub struct DraftCaptureState {
    source_image_path: Option<String>,
    prepared: Option<PreparedImage>,
    moment: MomentCell,
    expense_list: Option<String>,
}

impl DraftCaptureState {
    /// Start a session; the selected moment defaults to now.
    pub fn new() -> Self {
        let draft = Self::with_moment(MomentCell::new());
        draft.moment.get();
        draft
    }

    /// Start a session around an existing holder, which may still be unset.
    pub fn with_moment(moment: MomentCell) -> Self {
        Self {
            source_image_path: None,
            prepared: None,
            moment,
            expense_list: None,
        }
    }

    pub fn for_list(mut self, list_id: impl Into<String>) -> Self {
        self.expense_list = Some(list_id.into());
        self
    }

    /// Derive and store the working image and thumbnail. On error the
    /// previously held pair is kept.
    pub fn set_image(&mut self, raw: &DynamicImage) -> AppResult<()> {
        self.set_prepared(imaging::prepare(raw)?);
        Ok(())
    }

    /// Store a pair prepared elsewhere, replacing the previous one.
    pub fn set_prepared(&mut self, prepared: PreparedImage) {
        tracing::debug!(
            "Draft image set: working {}x{}, thumbnail {}x{}",
            prepared.working().width(),
            prepared.working().height(),
            prepared.thumbnail().width(),
            prepared.thumbnail().height()
        );
        self.prepared = Some(prepared);
    }

    pub fn set_source_image_path(&mut self, path: impl Into<String>) {
        self.source_image_path = Some(path.into());
    }

    pub fn source_image_path(&self) -> Option<&str> {
        self.source_image_path.as_deref()
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        self.prepared.as_ref().map(PreparedImage::working)
    }

    pub fn thumbnail(&self) -> Option<&DynamicImage> {
        self.prepared.as_ref().map(PreparedImage::thumbnail)
    }

    pub fn moment(&self) -> &MomentCell {
        &self.moment
    }

    pub fn expense_list(&self) -> Option<&str> {
        self.expense_list.as_deref()
    }

    /// Move the prepared pair out of the draft, leaving it without an image.
    pub(crate) fn take_prepared(&mut self) -> Option<PreparedImage> {
        self.prepared.take()
    }

    /// Drop the photo and its source path. The selected moment and target
    /// list are kept.
    pub fn clear(&mut self) {
        self.source_image_path = None;
        self.prepared = None;
    }
}
