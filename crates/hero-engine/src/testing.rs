use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::cancel::CancellationToken;
use crate::provider::{
    CreateImageRequest, DryrunProvider, EditImageRequest, EncodedImage, ImageProvider,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create {
        prompt: String,
        quality: Option<String>,
    },
    Edit {
        prompt: String,
        image: PathBuf,
    },
}

/// Provider that records every call and replays scripted failures.
/// Unscripted calls fall through to [`DryrunProvider`].
#[derive(Default)]
pub(crate) struct RecordingProvider {
    pub calls: Mutex<Vec<Call>>,
    create_failures: Mutex<VecDeque<Option<String>>>,
    edit_failures: Mutex<VecDeque<Option<String>>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next create call fails with `message`.
    pub fn fail_create(self, message: &str) -> Self {
        self.push(&self.create_failures, Some(message));
        self
    }

    /// Next create call succeeds; queued ahead of later scripted failures.
    pub fn pass_create(self) -> Self {
        self.push(&self.create_failures, None);
        self
    }

    pub fn fail_edit(self, message: &str) -> Self {
        self.push(&self.edit_failures, Some(message));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn edit_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Edit { .. }))
            .count()
    }

    fn push(&self, queue: &Mutex<VecDeque<Option<String>>>, message: Option<&str>) {
        if let Ok(mut queue) = queue.lock() {
            queue.push_back(message.map(str::to_string));
        }
    }

    fn next_failure(queue: &Mutex<VecDeque<Option<String>>>) -> Option<String> {
        queue.lock().ok().and_then(|mut queue| queue.pop_front()).flatten()
    }

    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl ImageProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    fn create_image(
        &self,
        request: &CreateImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        self.record(Call::Create {
            prompt: request.prompt.clone(),
            quality: request.quality.clone(),
        });
        if let Some(message) = Self::next_failure(&self.create_failures) {
            return Err(anyhow!(message));
        }
        DryrunProvider.create_image(request, cancel)
    }

    fn edit_image(
        &self,
        request: &EditImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        self.record(Call::Edit {
            prompt: request.prompt.clone(),
            image: request.image.path.clone(),
        });
        if let Some(message) = Self::next_failure(&self.edit_failures) {
            return Err(anyhow!(message));
        }
        DryrunProvider.edit_image(request, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::{Call, RecordingProvider};
    use crate::cancel::CancellationToken;
    use crate::provider::{CreateImageRequest, ImageProvider};

    fn request(prompt: &str) -> CreateImageRequest {
        CreateImageRequest {
            model: "gpt-image-1".to_string(),
            prompt: prompt.to_string(),
            size: "8x8".to_string(),
            quality: None,
            n: 1,
        }
    }

    #[test]
    fn scripted_create_outcomes_replay_in_order() {
        let provider = RecordingProvider::new()
            .pass_create()
            .fail_create("second fails");
        let cancel = CancellationToken::new();

        assert!(provider.create_image(&request("one"), &cancel).is_ok());
        assert!(provider.create_image(&request("two"), &cancel).is_err());
        assert!(provider.create_image(&request("three"), &cancel).is_ok());
        assert_eq!(provider.calls().len(), 3);
        assert!(matches!(&provider.calls()[1], Call::Create { prompt, .. } if prompt == "two"));
    }
}
