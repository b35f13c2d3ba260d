/// Integration tests for request handling against a shared cache and an
/// in-memory store: concurrency, feasibility scenarios, locality and
/// lost-work resend.

mod concurrency;
mod helpers;
mod locality;
mod resend;
