use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::{Expr, OnConflict, Query};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RotationCursor::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RotationCursor::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RotationCursor::Position)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RotationCursor::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Single shared cursor row; the application only ever touches id = 1
        let insert = Query::insert()
            .into_table(RotationCursor::Table)
            .columns([RotationCursor::Id, RotationCursor::Position])
            .values_panic([1.into(), 0.into()])
            .on_conflict(
                OnConflict::column(RotationCursor::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();
        manager.exec_stmt(insert).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RotationCursor::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RotationCursor {
    Table,
    Id,
    Position,
    UpdatedAt,
}
