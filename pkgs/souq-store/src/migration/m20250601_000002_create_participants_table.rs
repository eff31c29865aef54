use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Participants {
    Table,
    ConversationId,
    UserId,
    LastReadAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000002_create_participants_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Participants::Table)
                    .col(
                        ColumnDef::new(Participants::ConversationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Participants::UserId).string().not_null())
                    .col(ColumnDef::new(Participants::LastReadAt).big_integer())
                    .primary_key(
                        Index::create()
                            .col(Participants::ConversationId)
                            .col(Participants::UserId),
                    )
                    .to_owned(),
            )
            .await?;

        // Membership lookups run per user on every page fetch
        manager
            .create_index(
                Index::create()
                    .name("idx_participants_user_id")
                    .table(Participants::Table)
                    .col(Participants::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_participants_user_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Participants::Table).to_owned())
            .await
    }
}
