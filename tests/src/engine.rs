mod integration;
mod mock;
