pub mod open_epaper_link;
