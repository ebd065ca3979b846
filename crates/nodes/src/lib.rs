// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! visionkit-nodes: per-category node constructors.
//!
//! The factory turns `(node_type, node_name, parameters, request)` into
//! opaque [`visionkit_core::NodeHandle`]s. Constructors validate eagerly,
//! perform their documented side effects (directory pre-creation, transport
//! environment variables, broker connections) and report elision by
//! returning `None`.

mod base;
pub mod broker;
pub mod destination;
pub mod detector;
pub mod factory;
pub mod processor;
pub mod source;

pub use broker::EventPublisher;
pub use destination::{extract_rtmp_stream_key, unique_rtmp_url};
pub use factory::{category_allows_elision, category_of, create_node, FactoryContext};
