// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod codec;
pub mod configuration;
pub mod constants;
pub mod term;
