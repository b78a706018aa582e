//! Publishes Amazon Dash button presses to an MQTT broker
//!
//! A button press shows up on the network as a DHCP request from the
//! button's hardware address. The [`capture`] stage sees that request, the
//! [`handler`] debounces it and resolves a button id, and the [`mqtt`]
//! publisher sends one message per press.

pub mod capture;
pub mod config;
pub mod handler;
pub mod mqtt;
