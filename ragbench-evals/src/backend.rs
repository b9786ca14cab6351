// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Backend under comparison: an id bound to its retrieval and generation ports

use crate::ports::{Generator, Retriever};
use std::fmt;
use std::sync::Arc;

/// One retrieval + generation configuration under test
///
/// Backends are cheap to clone; the ports are shared.
#[derive(Clone)]
pub struct Backend {
    id: String,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
}

impl Backend {
    pub fn new(
        id: impl Into<String>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            id: id.into(),
            retriever,
            generator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn retriever(&self) -> &dyn Retriever {
        self.retriever.as_ref()
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("generator", &self.generator.model_name())
            .finish()
    }
}
