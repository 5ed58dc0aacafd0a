//! Bus and register model for MEN chameleon FPGAs.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what a chameleon board exposes: the device-id space of the
//! IP cores found in a chameleon table, the legacy module-code translation,
//! the GIRQ interrupt aggregator's register block, the PCI config-space
//! registers used to walk bridge chains, and the fixed limits of the board
//! handler.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`devid`] | Device ids, IP-core names, module-code → device-id table |
//! | [`girq`] | GIRQ register map (request/enable/api-version/in-use) |
//! | [`pci`] | Config-space offsets, header types, bus-path byte encoding |
//! | [`limits`] | Slot/group capacities and table sentinels |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod devid;
pub mod girq;
pub mod limits;
pub mod pci;
