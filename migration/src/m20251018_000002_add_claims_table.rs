use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

use crate::m20251018_000001_create_coupon_tables::{Coupons, Users};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only claim ledger; the newest row per user drives cooldowns
        manager
            .create_table(
                Table::create()
                    .table(Claims::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Claims::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Claims::UserId).string_len(128).not_null())
                    .col(ColumnDef::new(Claims::CouponId).big_integer().not_null())
                    .col(ColumnDef::new(Claims::CouponCode).string_len(64).not_null())
                    .col(
                        ColumnDef::new(Claims::IpAddress)
                            .string_len(45) // IPv6 max length
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Claims::ClaimedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_claims_user")
                            .from(Claims::Table, Claims::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_claims_coupon")
                            .from(Claims::Table, Claims::CouponId)
                            .to(Coupons::Table, Coupons::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Latest claim and history lookups per user
        manager
            .create_index(
                Index::create()
                    .name("idx_claims_user_time")
                    .table(Claims::Table)
                    .col(Claims::UserId)
                    .col(Claims::ClaimedAt)
                    .to_owned(),
            )
            .await?;

        // Advisory per-IP cooldown
        manager
            .create_index(
                Index::create()
                    .name("idx_claims_ip_time")
                    .table(Claims::Table)
                    .col(Claims::IpAddress)
                    .col(Claims::ClaimedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Claims::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Claims {
    Table,
    Id,
    UserId,
    CouponId,
    CouponCode,
    IpAddress,
    ClaimedAt,
}
