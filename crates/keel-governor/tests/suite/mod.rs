mod admission;
mod cleanup;
mod events;
mod lifecycle;
mod support;
