//! Test fixtures: the chess-store migration history used across engine
//! tests. The middle unit deliberately has a lossy inverse (its forward
//! drops a column; its backward re-adds the column without the data).

use crate::unit::MigrationUnit;

pub fn chess_units() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::new(
            "20231224121152_add_games",
            "add games",
            |s| {
                s.create_table("games", |t| {
                    t.id("id");
                    t.text("pgn");
                    t.small_integer("winner");
                    t.created_at();
                });
            },
            |s| {
                s.drop_table("games");
            },
        ),
        MigrationUnit::new(
            "20231224135536_clean_games",
            "clean games",
            |s| {
                s.set_nullable("games", "winner");
                s.drop_column("games", "pgn");
            },
            |s| {
                s.set_nullable("games", "winner");
                s.add_column("games", "pgn", "TEXT");
            },
        ),
        MigrationUnit::new(
            "20231224135659_add_moves",
            "add moves",
            |s| {
                s.create_table("moves", |t| {
                    t.id("id");
                    t.small_integer("nr").not_null();
                    t.string("uci").not_null();
                    t.uuid("game_id").not_null();
                    t.foreign_key("game_id", "games", "id");
                });
            },
            |s| {
                s.drop_table("moves");
            },
        ),
    ]
}
